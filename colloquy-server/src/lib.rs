//! colloquy-server: WebSocket front end for colloquy agent sessions.
//!
//! Observers connect on `/ws`, start a task with two agents from the
//! roster, watch the turns stream in, and answer review requests. Finished
//! conversations can be read back over the REST API when an archive is
//! configured.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod web;
