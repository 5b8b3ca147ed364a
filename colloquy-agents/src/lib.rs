//! colloquy-agents: turn-taking orchestration for small agent teams.
//!
//! A session runs fixed rounds of alternating agent turns, streams each turn
//! to its observer as it is generated, then pauses for a human reviewer:
//! - Prompt builder: bounded context for the next speaker
//! - Turn scheduler: round-robin state machine per session
//! - Streaming relay: gateway fragments → observer notifications
//! - Human gate: single-resolution decision slots with timeout fallback
//! - Session registry: one workflow per observer connection

pub mod archive;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod prompt;
pub mod registry;
pub mod relay;
pub mod roster;
pub mod scheduler;
pub mod session;

pub use error::{ConfigError, DecisionError, GateError, GatewayError, PromptError};
pub use model::{Decision, Outcome, Role, Stage, TurnRecord, WorkflowState};
pub use registry::SessionRegistry;
pub use scheduler::WorkflowConfig;
