//! Observer notifications and the per-observer outbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{Role, Stage, WorkflowState};

/// Speaker name used for system-level content.
pub const SYSTEM_SPEAKER: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Stage(StageUpdate),
    Content(ContentNotice),
}

/// Sent after every stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub session_id: String,
    pub stage: Stage,
    pub active_role: Role,
    pub iteration: u32,
    pub awaiting_human: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Agent,
    System,
    HumanInputRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNotice {
    pub turn_content_id: String,
    pub speaker: String,
    pub kind: MessageKind,
    pub fragment: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Notification {
    pub fn stage(state: &WorkflowState) -> Self {
        Notification::Stage(StageUpdate {
            session_id: state.id.clone(),
            stage: state.stage,
            active_role: state.active_role,
            iteration: state.iteration,
            awaiting_human: state.awaiting_human,
        })
    }

    /// A complete, single-message system notice.
    pub fn system(text: &str) -> Self {
        Notification::Content(ContentNotice {
            turn_content_id: new_content_id(),
            speaker: SYSTEM_SPEAKER.to_string(),
            kind: MessageKind::System,
            fragment: text.to_string(),
            is_complete: true,
            request_id: None,
        })
    }
}

pub(crate) fn new_content_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sending half of an observer's notification channel.
///
/// Sends never fail the workflow: if the observer is gone the notification
/// is dropped and the session carries on until it is reset.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Notification>,
    detached: Arc<AtomicBool>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            tx,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A handle on the same observer that can be [`detach`](Self::detach)ed
    /// without affecting this one. Each session writes through its own.
    pub fn scoped(&self) -> Self {
        Self::new(self.tx.clone())
    }

    /// Stop delivering through this handle and its clones.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn send(&self, notification: Notification) {
        if self.detached.load(Ordering::Acquire) {
            tracing::debug!("Outbox detached, notification dropped");
            return;
        }
        if self.tx.send(notification).is_err() {
            tracing::debug!("Observer gone, notification dropped");
        }
    }

    pub fn stage(&self, state: &WorkflowState) {
        self.send(Notification::stage(state));
    }

    pub fn system(&self, text: &str) {
        self.send(Notification::system(text));
    }

    pub fn error(&self, text: &str) {
        self.send(Notification::system(&format!("Error: {text}")));
    }

    pub fn human_input_request(&self, request_id: &str, prompt: &str) {
        self.send(Notification::Content(ContentNotice {
            turn_content_id: new_content_id(),
            speaker: SYSTEM_SPEAKER.to_string(),
            kind: MessageKind::HumanInputRequest,
            fragment: prompt.to_string(),
            is_complete: true,
            request_id: Some(request_id.to_string()),
        }));
    }

    pub fn is_closed(&self) -> bool {
        self.detached.load(Ordering::Acquire) || self.tx.is_closed()
    }
}
