//! Error types for the orchestration core.

use thiserror::Error;

/// Rejected session configuration. Raised before any state is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("a session needs two agents, got {found}")]
    TooFewAgents { found: usize },

    #[error("collaboration rounds alternate between exactly two agents, got {found}")]
    TooManyAgents { found: usize },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{0}' listed more than once")]
    DuplicateAgent(String),

    #[error("task text is empty")]
    EmptyTask,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("speaker role is empty")]
    EmptyRole,
}

/// Failure reported by a completion gateway. Ends the current turn's stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("undecodable event: {0}")]
    Decode(String),

    #[error("scripted failure: {0}")]
    Script(String),
}

/// An inbound decision that cannot be turned into a [`crate::Decision`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("unrecognized decision '{0}' (expected approve, revise, continue or cancel)")]
    UnknownTag(String),

    #[error("revise needs feedback text")]
    MissingFeedback,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("session {session_id} already has a pending review")]
    AlreadyPending { session_id: String },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("archive encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt archive row: {0}")]
    Corrupt(String),
}
