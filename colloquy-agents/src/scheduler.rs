//! Turn scheduler: drives one session through rounds and reviews.
//!
//! ```text
//! UserRequest ─► AgentCollaboration ─► HumanReview ─► Completed
//!                      ▲                    │
//!                      └── revise/continue ─┘
//! ```
//!
//! A round is `round_size` turns alternating between the two agents, always
//! starting with the first. Only one turn or one review is in flight at a
//! time, so each agent sees the other's finished output.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::archive::{Archive, ArchivedConversation};
use crate::error::ConfigError;
use crate::gate::{DEFAULT_REVIEW_TIMEOUT, HumanGate, Resolution};
use crate::gateway::{CompletionGateway, CompletionRequest};
use crate::model::{Decision, Outcome, Role, Stage};
use crate::prompt::{DEFAULT_CONTEXT_WINDOW, build_context, review_prompt};
use crate::relay::relay;
use crate::roster::AgentProfile;
use crate::session::Session;

/// Speaker name recorded for reviewer feedback.
pub const REVIEWER_SPEAKER: &str = "reviewer";

/// Tunables for every session a registry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Turns per collaboration round.
    pub round_size: usize,
    /// Trailing transcript entries each speaker sees.
    pub context_window: usize,
    /// How long a review waits before continuing on its own.
    pub review_timeout: Duration,
    /// Consecutive review timeouts before the session is closed as unattended.
    pub max_unattended_rounds: u32,
    /// Transcript entries quoted in the review prompt.
    pub summary_tail: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            round_size: 4,
            context_window: DEFAULT_CONTEXT_WINDOW,
            review_timeout: DEFAULT_REVIEW_TIMEOUT,
            max_unattended_rounds: 3,
            summary_tail: 4,
        }
    }
}

pub struct TurnScheduler {
    session: Arc<Session>,
    agents: Vec<AgentProfile>,
    gateway: Arc<dyn CompletionGateway>,
    gate: Arc<HumanGate>,
    config: WorkflowConfig,
    archive: Option<Arc<Archive>>,
}

impl TurnScheduler {
    /// Fails before any gateway call unless exactly two agents are given.
    pub fn new(
        session: Arc<Session>,
        agents: Vec<AgentProfile>,
        gateway: Arc<dyn CompletionGateway>,
        gate: Arc<HumanGate>,
        config: WorkflowConfig,
    ) -> Result<Self, ConfigError> {
        match agents.len() {
            n if n < 2 => return Err(ConfigError::TooFewAgents { found: n }),
            2 => {}
            n => return Err(ConfigError::TooManyAgents { found: n }),
        }
        Ok(Self {
            session,
            agents,
            gateway,
            gate,
            config,
            archive: None,
        })
    }

    pub fn with_archive(mut self, archive: Option<Arc<Archive>>) -> Self {
        self.archive = archive;
        self
    }

    /// Run the session to completion.
    pub async fn run(self) -> Outcome {
        let id = self.session.id().to_string();
        tracing::info!(
            session = %id,
            agents = ?self.agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            "Session started"
        );

        let mut unattended = 0u32;
        loop {
            if !self.run_round().await {
                return self.finish(Outcome::Cancelled);
            }

            match self.review().await {
                Resolution::Decided(Decision::Approve) => return self.finish(Outcome::Approved),
                Resolution::Decided(Decision::Cancel) | Resolution::Cancelled => {
                    return self.finish(Outcome::Cancelled);
                }
                Resolution::Decided(Decision::Revise { feedback }) => {
                    unattended = 0;
                    let iteration = self.session.update(|s| {
                        s.iteration += 1;
                        s.iteration
                    });
                    self.session
                        .append_turn(Role::HumanReviewer, REVIEWER_SPEAKER, feedback);
                    tracing::info!(session = %id, iteration, "Revision requested");
                }
                Resolution::Decided(Decision::Continue) => {
                    unattended = 0;
                    tracing::info!(session = %id, "Continuing");
                }
                Resolution::TimedOut => {
                    unattended += 1;
                    if unattended >= self.config.max_unattended_rounds {
                        self.session.outbox().system(&format!(
                            "No review after {unattended} rounds; closing the session."
                        ));
                        return self.finish(Outcome::Unattended);
                    }
                    self.session.outbox().system(&format!(
                        "No decision within {}s; continuing with another round.",
                        self.gate.timeout().as_secs()
                    ));
                }
            }
        }
    }

    /// One fixed round. Returns false if the session was cancelled mid-round.
    async fn run_round(&self) -> bool {
        let session = &self.session;
        let outbox = session.outbox();
        let task = session.snapshot().task;

        for turn in 0..self.config.round_size {
            if session.is_cancelled() {
                return false;
            }
            let role = Role::for_turn(turn);
            let Some(agent) = role.agent_index().and_then(|i| self.agents.get(i)) else {
                continue;
            };
            session.transition(Stage::AgentCollaboration, role);

            let transcript = session.transcript();
            let context = match build_context(&transcript, agent, &task, self.config.context_window) {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!(session = %session.id(), speaker = %agent.name, error = %e, "Skipping turn");
                    outbox.error(&format!("{} skipped a turn: {e}", agent.display_name));
                    continue;
                }
            };
            let stream = self.gateway.stream(CompletionRequest {
                speaker: agent.name.clone(),
                instruction: agent.instruction.clone(),
                context,
            });

            let relayed = relay(outbox, &agent.display_name, stream, session.cancel_token()).await;
            // A reset can land between the last fragment and here.
            if relayed.cancelled || session.is_cancelled() {
                tracing::info!(
                    session = %session.id(),
                    speaker = %agent.name,
                    turn = %relayed.turn_content_id,
                    "Turn discarded"
                );
                return false;
            }
            if let Some(e) = &relayed.error {
                outbox.error(&format!("{} stopped early: {e}", agent.display_name));
            }
            session.append_turn(role, &agent.display_name, relayed.text);
        }
        true
    }

    async fn review(&self) -> Resolution {
        let session = &self.session;
        let state = session.transition(Stage::HumanReview, Role::HumanReviewer);
        let prompt = review_prompt(&state, &session.transcript(), self.config.summary_tail);

        tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => Resolution::Cancelled,
            result = self.gate.request(session.id(), &prompt, session.outbox()) => match result {
                Ok(resolution) => resolution,
                Err(e) => {
                    tracing::error!(session = %session.id(), error = %e, "Review request rejected");
                    Resolution::Cancelled
                }
            },
        }
    }

    /// Archive (unless cancelled), then mark the session completed.
    fn finish(&self, outcome: Outcome) -> Outcome {
        let session = &self.session;
        let state = session.snapshot();

        if outcome != Outcome::Cancelled {
            if let Some(archive) = &self.archive {
                let conversation = ArchivedConversation {
                    session_id: state.id.clone(),
                    task: state.task.clone(),
                    participants: state.participant_names.clone(),
                    iteration: state.iteration,
                    outcome,
                    completed_at: Utc::now(),
                    transcript: session.transcript(),
                };
                if let Err(e) = archive.record(&conversation) {
                    tracing::error!(session = %state.id, error = %e, "Failed to archive conversation");
                }
            }
        }

        session.set_outcome(outcome);
        session.transition(Stage::Completed, state.active_role);
        let note = match outcome {
            Outcome::Approved => "Approved. Session complete.",
            Outcome::Cancelled => "Session cancelled.",
            Outcome::Unattended => "Session closed without review.",
        };
        session.outbox().system(note);
        tracing::info!(session = %state.id, outcome = outcome.as_str(), iteration = state.iteration, "Session completed");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Script, ScriptedGateway};
    use crate::model::WorkflowState;
    use crate::notify::Outbox;
    use crate::roster::Roster;

    fn scheduler(agents: &[&str]) -> Result<TurnScheduler, ConfigError> {
        let roster = Roster::builtin();
        let agents = agents.iter().filter_map(|n| roster.get(n).cloned()).collect();
        let (outbox, _rx) = Outbox::channel();
        let session = Arc::new(Session::new(
            WorkflowState::new("s1".into(), "task".into(), vec![]),
            outbox,
        ));
        TurnScheduler::new(
            session,
            agents,
            Arc::new(ScriptedGateway::new(vec![Script::reply("ok")])),
            Arc::new(HumanGate::default()),
            WorkflowConfig::default(),
        )
    }

    #[test]
    fn rejects_wrong_team_size() {
        assert_eq!(
            scheduler(&["planner"]).err(),
            Some(ConfigError::TooFewAgents { found: 1 })
        );
        assert_eq!(
            scheduler(&["planner", "critic", "writer"]).err(),
            Some(ConfigError::TooManyAgents { found: 3 })
        );
        assert!(scheduler(&["planner", "critic"]).is_ok());
    }

    /// Replies once, then cancels the session as the stream ends.
    struct CancelAfterReply(Arc<Session>);

    impl CompletionGateway for CancelAfterReply {
        fn stream(&self, _request: CompletionRequest) -> crate::gateway::FragmentStream {
            let session = self.0.clone();
            Box::pin(async_stream::stream! {
                yield Ok::<_, crate::error::GatewayError>("finished reply".to_string());
                session.cancel();
            })
        }
    }

    #[tokio::test]
    async fn reset_after_last_fragment_discards_turn() {
        let roster = Roster::builtin();
        let agents = ["planner", "critic"]
            .iter()
            .filter_map(|n| roster.get(n).cloned())
            .collect();
        let (outbox, _rx) = Outbox::channel();
        let session = Arc::new(Session::new(
            WorkflowState::new("s1".into(), "task".into(), vec![]),
            outbox,
        ));
        let scheduler = TurnScheduler::new(
            session.clone(),
            agents,
            Arc::new(CancelAfterReply(session.clone())),
            Arc::new(HumanGate::default()),
            WorkflowConfig::default(),
        )
        .unwrap();

        assert_eq!(scheduler.run().await, Outcome::Cancelled);
        assert!(session.transcript().is_empty());
        assert_eq!(session.outcome(), Some(Outcome::Cancelled));
    }

    #[test]
    fn default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.round_size, 4);
        assert_eq!(config.context_window, 6);
        assert_eq!(config.review_timeout, Duration::from_secs(300));
    }
}
