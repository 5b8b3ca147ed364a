//! A live session: workflow state, transcript and cancellation handle.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::model::{Outcome, Role, Stage, TurnRecord, WorkflowState};
use crate::notify::Outbox;

pub struct Session {
    id: String,
    state: Mutex<WorkflowState>,
    transcript: Mutex<Vec<TurnRecord>>,
    outcome: Mutex<Option<Outcome>>,
    cancel: CancellationToken,
    stage_tx: watch::Sender<Stage>,
    outbox: Outbox,
}

impl Session {
    pub fn new(state: WorkflowState, outbox: Outbox) -> Self {
        let (stage_tx, _) = watch::channel(state.stage);
        Self {
            id: state.id.clone(),
            state: Mutex::new(state),
            transcript: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
            cancel: CancellationToken::new(),
            stage_tx,
            outbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.state.lock().clone()
    }

    pub fn transcript(&self) -> Vec<TurnRecord> {
        self.transcript.lock().clone()
    }

    /// Mutate the state in place. Stage changes go through [`transition`](Self::transition).
    pub fn update<R>(&self, f: impl FnOnce(&mut WorkflowState) -> R) -> R {
        let mut state = self.state.lock();
        let stage = state.stage;
        let out = f(&mut state);
        debug_assert_eq!(stage, state.stage, "use transition() to change stage");
        out
    }

    /// Move to `stage`/`role` and tell the observer.
    pub fn transition(&self, stage: Stage, role: Role) -> WorkflowState {
        let snapshot = {
            let mut state = self.state.lock();
            state.transition(stage, role);
            state.clone()
        };
        self.stage_tx.send_replace(stage);
        self.outbox.stage(&snapshot);
        tracing::debug!(session = %self.id, %stage, %role, "Stage transition");
        snapshot
    }

    pub fn append_turn(&self, role: Role, speaker: &str, content: String) -> TurnRecord {
        let mut transcript = self.transcript.lock();
        let record = TurnRecord {
            turn_index: transcript.len(),
            role,
            speaker: speaker.to_string(),
            content,
        };
        transcript.push(record.clone());
        record
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn watch_stage(&self) -> watch::Receiver<Stage> {
        self.stage_tx.subscribe()
    }

    /// Wait until the session reaches `Completed`.
    pub async fn completed(&self) -> Option<Outcome> {
        let mut rx = self.watch_stage();
        // The sender lives in `self`, so this only errors if it is dropped mid-wait.
        let _ = rx.wait_for(|stage| *stage == Stage::Completed).await;
        self.outcome()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        *self.outcome.lock()
    }

    pub(crate) fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock() = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;

    fn session() -> (Session, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (outbox, rx) = Outbox::channel();
        let state = WorkflowState::new("s1".into(), "task".into(), vec!["a".into(), "b".into()]);
        (Session::new(state, outbox), rx)
    }

    #[test]
    fn transition_notifies_observer() {
        let (session, mut rx) = session();
        session.transition(Stage::AgentCollaboration, Role::AgentB);
        match rx.try_recv().unwrap() {
            Notification::Stage(update) => {
                assert_eq!(update.session_id, "s1");
                assert_eq!(update.stage, Stage::AgentCollaboration);
                assert_eq!(update.active_role, Role::AgentB);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*session.watch_stage().borrow(), Stage::AgentCollaboration);
    }

    #[test]
    fn transcript_indices_follow_append_order() {
        let (session, _rx) = session();
        session.append_turn(Role::AgentA, "A", "one".into());
        let second = session.append_turn(Role::AgentB, "B", "two".into());
        assert_eq!(second.turn_index, 1);
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn completed_waits_for_terminal_stage() {
        let (session, _rx) = session();
        let session = std::sync::Arc::new(session);
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.completed().await })
        };
        session.set_outcome(Outcome::Approved);
        session.transition(Stage::Completed, Role::AgentB);
        assert_eq!(waiter.await.unwrap(), Some(Outcome::Approved));
    }
}
