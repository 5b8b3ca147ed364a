//! Human gate: suspends a session until its reviewer decides.
//!
//! Every pending request owns a oneshot slot in a shared table. Whoever
//! removes the entry from the table is the only party allowed to resolve it,
//! so a decision, a timeout and a reset racing for the same request settle
//! on exactly one outcome.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::GateError;
use crate::model::Decision;
use crate::notify::Outbox;

/// Default wait before a review resolves on its own.
pub const DEFAULT_REVIEW_TIMEOUT: Duration = Duration::from_secs(300);

/// How a review request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Decided(Decision),
    /// Nobody answered in time. The scheduler treats this as `Continue`.
    TimedOut,
    /// The session was reset or its observer left.
    Cancelled,
}

struct Pending {
    session_id: String,
    slot: oneshot::Sender<Resolution>,
}

pub struct HumanGate {
    pending: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
}

impl HumanGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the reviewer of `session_id` for a decision and wait for it.
    pub async fn request(
        &self,
        session_id: &str,
        prompt: &str,
        outbox: &Outbox,
    ) -> Result<Resolution, GateError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.values().any(|p| p.session_id == session_id) {
                return Err(GateError::AlreadyPending {
                    session_id: session_id.to_string(),
                });
            }
            pending.insert(
                request_id.clone(),
                Pending {
                    session_id: session_id.to_string(),
                    slot: tx,
                },
            );
        }
        let _guard = PendingGuard {
            gate: self,
            request_id: &request_id,
        };

        tracing::info!(session = %session_id, request = %request_id, "Awaiting review");
        outbox.human_input_request(&request_id, prompt);

        let waited = tokio::time::timeout(self.timeout, &mut rx).await;
        let resolution = match waited {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Resolution::Cancelled,
            Err(_) => {
                // Timed out, unless a resolver got to the slot first.
                let expired = self.pending.lock().remove(&request_id).is_some();
                if expired {
                    tracing::info!(session = %session_id, request = %request_id, "Review timed out");
                    Resolution::TimedOut
                } else {
                    rx.try_recv().unwrap_or(Resolution::Cancelled)
                }
            }
        };
        Ok(resolution)
    }

    /// Resolve `request_id`. First writer wins; returns whether this call did.
    pub fn resolve(&self, request_id: &str, decision: Decision) -> bool {
        let mut pending = self.pending.lock();
        match pending.remove(request_id) {
            Some(p) => p.slot.send(Resolution::Decided(decision)).is_ok(),
            None => false,
        }
    }

    /// Like [`resolve`](Self::resolve), but only if the request belongs to
    /// `session_id`.
    pub fn resolve_for_session(&self, session_id: &str, request_id: &str, decision: Decision) -> bool {
        let mut pending = self.pending.lock();
        if pending.get(request_id).is_none_or(|p| p.session_id != session_id) {
            return false;
        }
        match pending.remove(request_id) {
            Some(p) => p.slot.send(Resolution::Decided(decision)).is_ok(),
            None => false,
        }
    }

    /// Resolve the session's pending request, if any, as cancelled.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        let mut pending = self.pending.lock();
        let Some(request_id) = find(&pending, session_id) else {
            return false;
        };
        match pending.remove(&request_id) {
            Some(p) => {
                tracing::info!(session = %session_id, request = %request_id, "Review cancelled");
                p.slot.send(Resolution::Cancelled).is_ok()
            }
            None => false,
        }
    }

    /// Request id currently pending for `session_id`.
    pub fn pending_for(&self, session_id: &str) -> Option<String> {
        find(&self.pending.lock(), session_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for HumanGate {
    fn default() -> Self {
        Self::new(DEFAULT_REVIEW_TIMEOUT)
    }
}

fn find(pending: &HashMap<String, Pending>, session_id: &str) -> Option<String> {
    pending
        .iter()
        .find(|(_, p)| p.session_id == session_id)
        .map(|(id, _)| id.clone())
}

/// Drops the table entry if the waiting future goes away first.
struct PendingGuard<'a> {
    gate: &'a HumanGate,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.gate.pending.lock().remove(self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notify::{MessageKind, Notification};

    async fn request_id(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Notification>) -> String {
        loop {
            if let Some(Notification::Content(c)) = rx.recv().await {
                if c.kind == MessageKind::HumanInputRequest {
                    return c.request_id.unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let gate = Arc::new(HumanGate::new(Duration::from_secs(60)));
        let (outbox, mut rx) = Outbox::channel();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request("s1", "decide", &outbox).await })
        };
        let id = request_id(&mut rx).await;

        assert!(gate.resolve(&id, Decision::Approve));
        assert!(!gate.resolve(&id, Decision::Cancel));
        assert_eq!(waiter.await.unwrap(), Ok(Resolution::Decided(Decision::Approve)));
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn one_pending_request_per_session() {
        let gate = Arc::new(HumanGate::new(Duration::from_secs(60)));
        let (outbox, mut rx) = Outbox::channel();
        let first = {
            let gate = gate.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move { gate.request("s1", "decide", &outbox).await })
        };
        let id = request_id(&mut rx).await;

        assert_eq!(
            gate.request("s1", "again", &outbox).await,
            Err(GateError::AlreadyPending {
                session_id: "s1".to_string()
            })
        );
        assert_eq!(gate.pending_count(), 1);
        assert_eq!(gate.pending_for("s1"), Some(id.clone()));

        gate.resolve(&id, Decision::Continue);
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn decisions_are_scoped_to_their_session() {
        let gate = Arc::new(HumanGate::new(Duration::from_secs(60)));
        let (outbox, mut rx) = Outbox::channel();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request("s1", "decide", &outbox).await })
        };
        let id = request_id(&mut rx).await;

        assert!(!gate.resolve_for_session("s2", &id, Decision::Approve));
        assert!(gate.resolve_for_session("s1", &id, Decision::Cancel));
        assert_eq!(waiter.await.unwrap(), Ok(Resolution::Decided(Decision::Cancel)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_and_clears_slot() {
        let gate = HumanGate::new(Duration::from_secs(300));
        let (outbox, _rx) = Outbox::channel();
        let resolution = gate.request("s1", "decide", &outbox).await;
        assert_eq!(resolution, Ok(Resolution::TimedOut));
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_session_resolves_as_cancelled() {
        let gate = Arc::new(HumanGate::new(Duration::from_secs(60)));
        let (outbox, mut rx) = Outbox::channel();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request("s1", "decide", &outbox).await })
        };
        let id = request_id(&mut rx).await;

        assert!(gate.cancel_session("s1"));
        assert!(!gate.cancel_session("s1"));
        assert!(!gate.resolve(&id, Decision::Approve));
        assert_eq!(waiter.await.unwrap(), Ok(Resolution::Cancelled));
    }

    #[tokio::test]
    async fn dropped_waiter_leaves_no_entry() {
        let gate = Arc::new(HumanGate::new(Duration::from_secs(60)));
        let (outbox, mut rx) = Outbox::channel();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request("s1", "decide", &outbox).await })
        };
        request_id(&mut rx).await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.pending_count(), 0);
    }
}
