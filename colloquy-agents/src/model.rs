//! Session data model: stages, roles, transcript records and decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;

/// Coarse phase of a session's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    UserRequest,
    AgentCollaboration,
    HumanReview,
    Completed,
}

impl Stage {
    /// Whether `role` may be active while the session is in this stage.
    pub fn admits(self, role: Role) -> bool {
        match self {
            Stage::UserRequest => role == Role::EndUser,
            Stage::AgentCollaboration => matches!(role, Role::AgentA | Role::AgentB),
            Stage::HumanReview => role == Role::HumanReviewer,
            Stage::Completed => true,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::UserRequest => write!(f, "user_request"),
            Stage::AgentCollaboration => write!(f, "agent_collaboration"),
            Stage::HumanReview => write!(f, "human_review"),
            Stage::Completed => write!(f, "completed"),
        }
    }
}

/// Participant slot currently holding the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    EndUser,
    AgentA,
    AgentB,
    HumanReviewer,
}

impl Role {
    /// Agent slot for the `turn`-th turn of a round: A, B, A, B, ...
    pub fn for_turn(turn: usize) -> Role {
        if turn % 2 == 0 { Role::AgentA } else { Role::AgentB }
    }

    /// Index into the session's participant list, for agent roles.
    pub fn agent_index(self) -> Option<usize> {
        match self {
            Role::AgentA => Some(0),
            Role::AgentB => Some(1),
            Role::EndUser | Role::HumanReviewer => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::EndUser => "end_user",
            Role::AgentA => "agent_a",
            Role::AgentB => "agent_b",
            Role::HumanReviewer => "human_reviewer",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "end_user" => Some(Role::EndUser),
            "agent_a" => Some(Role::AgentA),
            "agent_b" => Some(Role::AgentB),
            "human_reviewer" => Some(Role::HumanReviewer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized transcript entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: usize,
    pub role: Role,
    pub speaker: String,
    pub content: String,
}

/// The human reviewer's resolution of a pending review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Finish successfully.
    Approve,
    /// Run another round with the feedback in context; bumps the iteration.
    Revise { feedback: String },
    /// Run another round as-is.
    Continue,
    /// Finish and discard.
    Cancel,
}

impl Decision {
    /// Parse an inbound decision tag (case-insensitive).
    pub fn parse(tag: &str, feedback: Option<&str>) -> Result<Self, DecisionError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Decision::Approve),
            "revise" => {
                let feedback = feedback
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .ok_or(DecisionError::MissingFeedback)?;
                Ok(Decision::Revise {
                    feedback: feedback.to_string(),
                })
            }
            "continue" => Ok(Decision::Continue),
            "cancel" => Ok(Decision::Cancel),
            other => Err(DecisionError::UnknownTag(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Revise { .. } => "revise",
            Decision::Continue => "continue",
            Decision::Cancel => "cancel",
        }
    }
}

/// How a session reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Cancelled,
    /// Too many review timeouts in a row.
    Unattended,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Approved => "approved",
            Outcome::Cancelled => "cancelled",
            Outcome::Unattended => "unattended",
        }
    }

    pub fn parse(s: &str) -> Option<Outcome> {
        match s {
            "approved" => Some(Outcome::Approved),
            "cancelled" => Some(Outcome::Cancelled),
            "unattended" => Some(Outcome::Unattended),
            _ => None,
        }
    }
}

/// Per-observer workflow state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowState {
    pub id: String,
    pub stage: Stage,
    pub active_role: Role,
    /// Set once at creation.
    pub task: String,
    /// The agents assigned to this session, in speaking order.
    pub participant_names: Vec<String>,
    /// Starts at 1; bumped on every revision.
    pub iteration: u32,
    pub awaiting_human: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(id: String, task: String, participant_names: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: Stage::UserRequest,
            active_role: Role::EndUser,
            task,
            participant_names,
            iteration: 1,
            awaiting_human: false,
            created_at: now,
            last_activity: now,
        }
    }

    /// Move to `stage` with `role` holding the floor.
    pub fn transition(&mut self, stage: Stage, role: Role) {
        debug_assert!(stage.admits(role), "{role} cannot be active in {stage}");
        self.stage = stage;
        self.active_role = role;
        self.awaiting_human = stage == Stage::HumanReview;
        self.last_activity = Utc::now();
    }

    /// Participant name for an agent role.
    pub fn speaker_name(&self, role: Role) -> Option<&str> {
        role.agent_index()
            .and_then(|i| self.participant_names.get(i))
            .map(String::as_str)
    }

    pub fn is_completed(&self) -> bool {
        self.stage == Stage::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_alternates_between_two_slots() {
        let order: Vec<Role> = (0..4).map(Role::for_turn).collect();
        assert_eq!(
            order,
            vec![Role::AgentA, Role::AgentB, Role::AgentA, Role::AgentB]
        );
    }

    #[test]
    fn stage_role_consistency() {
        assert!(Stage::AgentCollaboration.admits(Role::AgentA));
        assert!(Stage::AgentCollaboration.admits(Role::AgentB));
        assert!(!Stage::AgentCollaboration.admits(Role::HumanReviewer));
        assert!(!Stage::HumanReview.admits(Role::AgentA));
        assert!(Stage::UserRequest.admits(Role::EndUser));
        assert!(Stage::Completed.admits(Role::AgentB));
    }

    #[test]
    fn decision_tags_parse() {
        assert_eq!(Decision::parse("Approve", None), Ok(Decision::Approve));
        assert_eq!(Decision::parse(" continue ", None), Ok(Decision::Continue));
        assert_eq!(Decision::parse("CANCEL", Some("ignored")), Ok(Decision::Cancel));
        assert_eq!(
            Decision::parse("revise", Some("  shorten it ")),
            Ok(Decision::Revise {
                feedback: "shorten it".to_string()
            })
        );
    }

    #[test]
    fn revise_without_feedback_is_rejected() {
        assert_eq!(
            Decision::parse("revise", None),
            Err(DecisionError::MissingFeedback)
        );
        assert_eq!(
            Decision::parse("revise", Some("   ")),
            Err(DecisionError::MissingFeedback)
        );
    }

    #[test]
    fn unknown_decision_tag_is_a_client_error() {
        assert_eq!(
            Decision::parse("ship-it", None),
            Err(DecisionError::UnknownTag("ship-it".to_string()))
        );
    }

    #[test]
    fn new_state_starts_at_user_request() {
        let state = WorkflowState::new(
            "s1".into(),
            "write a haiku".into(),
            vec!["planner".into(), "critic".into()],
        );
        assert_eq!(state.stage, Stage::UserRequest);
        assert_eq!(state.active_role, Role::EndUser);
        assert_eq!(state.iteration, 1);
        assert!(!state.awaiting_human);
        assert_eq!(state.speaker_name(Role::AgentB), Some("critic"));
        assert_eq!(state.speaker_name(Role::HumanReviewer), None);
    }

    #[test]
    fn review_transition_sets_awaiting_flag() {
        let mut state = WorkflowState::new("s1".into(), "t".into(), vec![]);
        state.transition(Stage::HumanReview, Role::HumanReviewer);
        assert!(state.awaiting_human);
        state.transition(Stage::AgentCollaboration, Role::AgentA);
        assert!(!state.awaiting_human);
    }

    #[test]
    fn role_and_outcome_strings_round_trip() {
        for role in [Role::EndUser, Role::AgentA, Role::AgentB, Role::HumanReviewer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        for outcome in [Outcome::Approved, Outcome::Cancelled, Outcome::Unattended] {
            assert_eq!(Outcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}
