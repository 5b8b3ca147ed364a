//! Observer WebSocket protocol. Inbound frames are [`ClientMessage`] JSON;
//! outbound frames are [`colloquy_agents::notify::Notification`] JSON.

use serde::{Deserialize, Serialize};

/// Observer-to-server messages sent as JSON text frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a new task, replacing any session this connection already has.
    StartTask { task: String, agents: Vec<String> },
    /// Answer a pending review.
    Decision {
        request_id: String,
        decision: String,
        #[serde(default)]
        feedback: Option<String>,
    },
    /// Drop the current session.
    Reset,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
