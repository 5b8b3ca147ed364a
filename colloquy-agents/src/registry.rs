//! Session registry: one workflow per observer, keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::archive::Archive;
use crate::error::ConfigError;
use crate::gate::HumanGate;
use crate::gateway::CompletionGateway;
use crate::model::{Decision, WorkflowState};
use crate::notify::Outbox;
use crate::roster::{AgentProfile, Roster};
use crate::scheduler::{TurnScheduler, WorkflowConfig};
use crate::session::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    roster: Roster,
    gateway: Arc<dyn CompletionGateway>,
    gate: Arc<HumanGate>,
    config: WorkflowConfig,
    archive: Option<Arc<Archive>>,
}

impl SessionRegistry {
    pub fn new(roster: Roster, gateway: Arc<dyn CompletionGateway>, config: WorkflowConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            roster,
            gateway,
            gate: Arc::new(HumanGate::new(config.review_timeout)),
            config,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Check a task and team without touching any session.
    pub fn validate(&self, task: &str, agents: &[String]) -> Result<Vec<AgentProfile>, ConfigError> {
        if task.trim().is_empty() {
            return Err(ConfigError::EmptyTask);
        }
        self.roster.resolve(agents)
    }

    /// Validate, register and start a session. Must be called inside a
    /// Tokio runtime; the scheduler runs on its own task.
    ///
    /// Configuration errors are returned before anything is registered.
    pub fn create(&self, task: &str, agents: &[String], outbox: Outbox) -> Result<String, ConfigError> {
        self.replace(None, task, agents, outbox)
    }

    /// Like [`create`](Self::create), but tears down `previous` once the new
    /// session is accepted. A rejected configuration leaves `previous` running.
    /// Anything the replaced session still emits is dropped.
    pub fn replace(
        &self,
        previous: Option<&str>,
        task: &str,
        agents: &[String],
        outbox: Outbox,
    ) -> Result<String, ConfigError> {
        let profiles = self.validate(task, agents)?;
        let task = task.trim();

        let id = uuid::Uuid::new_v4().to_string();
        let names = profiles.iter().map(|p| p.name.clone()).collect();
        let session = Arc::new(Session::new(
            WorkflowState::new(id.clone(), task.to_string(), names),
            outbox.scoped(),
        ));
        let scheduler = TurnScheduler::new(
            session.clone(),
            profiles,
            self.gateway.clone(),
            self.gate.clone(),
            self.config.clone(),
        )?
        .with_archive(self.archive.clone());

        if let Some(previous) = previous {
            self.teardown(previous, true);
        }

        session.outbox().stage(&session.snapshot());
        self.sessions.write().insert(id.clone(), session);
        tracing::info!(session = %id, task, "Session created");

        tokio::spawn(async move {
            scheduler.run().await;
        });
        Ok(id)
    }

    /// Snapshot of a session's state.
    pub fn get(&self, session_id: &str) -> Option<WorkflowState> {
        self.session(session_id).map(|s| s.snapshot())
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Cancel a session's pending review and in-flight turn and forget it.
    /// Returns false if there was nothing to reset.
    pub fn reset(&self, session_id: &str) -> bool {
        self.teardown(session_id, false)
    }

    /// Called when the observer disconnects.
    pub fn cleanup(&self, session_id: &str) -> bool {
        self.reset(session_id)
    }

    /// Route a reviewer decision. Late, unknown or foreign decisions are
    /// logged and dropped.
    pub fn submit_decision(&self, session_id: &str, request_id: &str, decision: Decision) -> bool {
        let Some(session) = self.session(session_id) else {
            tracing::warn!(session = %session_id, request = %request_id, "Decision for unknown session");
            return false;
        };
        if session.snapshot().is_completed() {
            tracing::warn!(session = %session_id, request = %request_id, "Late decision discarded");
            return false;
        }
        let tag = decision.tag();
        if self.gate.resolve_for_session(session_id, request_id, decision) {
            tracing::info!(session = %session_id, request = %request_id, decision = tag, "Decision accepted");
            true
        } else {
            tracing::warn!(session = %session_id, request = %request_id, "No pending review with that id");
            false
        }
    }

    /// Sessions that have not completed.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.snapshot().is_completed())
            .count()
    }

    fn teardown(&self, session_id: &str, detach: bool) -> bool {
        let Some(session) = self.sessions.write().remove(session_id) else {
            return false;
        };
        if detach {
            session.outbox().detach();
        }
        self.gate.cancel_session(session_id);
        session.cancel();
        tracing::info!(session = %session_id, replaced = detach, "Session reset");
        true
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn gate(&self) -> &HumanGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Script, ScriptedGateway};
    use crate::notify::Notification;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Roster::builtin(),
            Arc::new(ScriptedGateway::new(vec![Script::reply("fine")])),
            WorkflowConfig::default(),
        )
    }

    fn team(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn configuration_errors_register_nothing() {
        let registry = registry();
        let (outbox, mut rx) = Outbox::channel();
        assert_eq!(
            registry.create("  ", &team(&["planner", "critic"]), outbox.clone()),
            Err(ConfigError::EmptyTask)
        );
        assert_eq!(
            registry.create("task", &team(&["planner"]), outbox),
            Err(ConfigError::TooFewAgents { found: 1 })
        );
        assert_eq!(registry.active_sessions(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_sessions_are_no_ops() {
        let registry = registry();
        assert!(registry.get("nope").is_none());
        assert!(!registry.reset("nope"));
        assert!(!registry.cleanup("nope"));
        assert!(!registry.submit_decision("nope", "req", Decision::Approve));
    }

    #[tokio::test]
    async fn rejected_replacement_keeps_previous_session() {
        let registry = registry();
        let (outbox, _rx) = Outbox::channel();
        let first = registry
            .create("write a haiku", &team(&["planner", "critic"]), outbox.clone())
            .unwrap();

        assert_eq!(
            registry.replace(Some(&first), "again", &team(&["planner"]), outbox.clone()),
            Err(ConfigError::TooFewAgents { found: 1 })
        );
        assert!(registry.get(&first).is_some());
        assert!(!registry.session(&first).unwrap().is_cancelled());

        let second = registry
            .replace(Some(&first), "again", &team(&["critic", "planner"]), outbox)
            .unwrap();
        assert!(registry.get(&first).is_none());
        assert!(registry.get(&second).is_some());
    }

    #[tokio::test]
    async fn replaced_session_goes_quiet() {
        let registry = registry();
        let (outbox, mut rx) = Outbox::channel();
        let first = registry
            .create("write a haiku", &team(&["planner", "critic"]), outbox.clone())
            .unwrap();
        let old = registry.session(&first).unwrap();
        let second = registry
            .replace(Some(&first), "again", &team(&["planner", "critic"]), outbox)
            .unwrap();

        assert!(old.is_cancelled());
        assert!(old.outbox().is_closed());
        tokio::time::timeout(std::time::Duration::from_secs(5), old.completed())
            .await
            .unwrap();

        // The old session's teardown never reaches the observer.
        let mut seen_new = false;
        while let Ok(n) = rx.try_recv() {
            match n {
                Notification::Stage(update) if update.session_id == second => seen_new = true,
                Notification::Stage(update) => assert_ne!(update.stage, crate::Stage::Completed),
                Notification::Content(c) => assert_ne!(c.fragment, "Session cancelled."),
            }
        }
        assert!(seen_new);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let registry = registry();
        let (outbox, _rx) = Outbox::channel();
        let id = registry
            .create("write a haiku", &team(&["planner", "critic"]), outbox)
            .unwrap();
        assert!(registry.get(&id).is_some());
        assert!(registry.reset(&id));
        assert!(!registry.reset(&id));
        assert!(registry.get(&id).is_none());
    }
}
