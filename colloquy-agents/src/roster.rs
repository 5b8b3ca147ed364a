//! Agent roster: named profiles a session can draw its two agents from.
//!
//! Each profile carries a system instruction for the gateway and a short
//! reminder that the prompt builder repeats at the end of every context, so
//! the agent keeps its voice across long transcripts.

use serde::Serialize;

use crate::error::ConfigError;

/// A named agent personality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentProfile {
    /// Lookup key used by observers when choosing a roster, e.g. "planner".
    pub name: String,
    /// Name shown next to the agent's messages.
    pub display_name: String,
    /// System instruction sent with every turn.
    pub instruction: String,
    /// Role reminder appended to the turn context.
    pub reminder: String,
}

impl AgentProfile {
    pub fn new(name: &str, display_name: &str, instruction: &str, reminder: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            instruction: instruction.to_string(),
            reminder: reminder.to_string(),
        }
    }
}

/// Set of profiles available to sessions.
#[derive(Debug, Clone)]
pub struct Roster {
    profiles: Vec<AgentProfile>,
}

impl Roster {
    pub fn new(profiles: Vec<AgentProfile>) -> Self {
        Self { profiles }
    }

    /// The built-in team.
    pub fn builtin() -> Self {
        Self::new(vec![
            AgentProfile::new("planner", "Planner", PLANNER_INSTRUCTION, PLANNER_REMINDER),
            AgentProfile::new("critic", "Critic", CRITIC_INSTRUCTION, CRITIC_REMINDER),
            AgentProfile::new("engineer", "Engineer", ENGINEER_INSTRUCTION, ENGINEER_REMINDER),
            AgentProfile::new("writer", "Writer", WRITER_INSTRUCTION, WRITER_REMINDER),
        ])
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        let name = name.trim();
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Map requested agent names to profiles, in the order given.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<AgentProfile>, ConfigError> {
        if names.len() < 2 {
            return Err(ConfigError::TooFewAgents { found: names.len() });
        }
        if names.len() > 2 {
            return Err(ConfigError::TooManyAgents { found: names.len() });
        }

        let mut resolved: Vec<AgentProfile> = Vec::with_capacity(names.len());
        for name in names {
            let profile = self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownAgent(name.trim().to_string()))?;
            if resolved.iter().any(|p| p.name == profile.name) {
                return Err(ConfigError::DuplicateAgent(profile.name.clone()));
            }
            resolved.push(profile.clone());
        }
        Ok(resolved)
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::builtin()
    }
}

const PLANNER_INSTRUCTION: &str = r#"You are the Planner on a two-person working team. You turn the user's task into a concrete approach: goals, steps, open risks.

Rules:
- Build on what your teammate said last. Agree, refine, or push back with a reason.
- Prefer short numbered lists over prose.
- Never repeat the whole plan; only state what changed.
- If the reviewer left feedback, address it first."#;

const PLANNER_REMINDER: &str =
    "Stay concrete. Refine the plan; do not restate it. Address reviewer feedback first.";

const CRITIC_INSTRUCTION: &str = r#"You are the Critic on a two-person working team. You stress-test whatever your teammate just proposed.

Rules:
- Name the single weakest point first, then at most two more.
- Every objection comes with a suggested fix.
- Say plainly when something is good enough; do not invent problems.
- Keep it under 150 words."#;

const CRITIC_REMINDER: &str =
    "Weakest point first, each objection with a fix. Under 150 words.";

const ENGINEER_INSTRUCTION: &str = r#"You are the Engineer on a two-person working team. You turn ideas into something buildable: interfaces, data shapes, code sketches.

Rules:
- Show, don't describe. Code blocks beat paragraphs.
- Call out anything that would not survive contact with production.
- Keep sketches minimal; no boilerplate."#;

const ENGINEER_REMINDER: &str =
    "Show concrete interfaces or code. Flag what breaks in production. No boilerplate.";

const WRITER_INSTRUCTION: &str = r#"You are the Writer on a two-person working team. You turn the team's working notes into clear text a reader could use as-is.

Rules:
- Rewrite, don't summarize the conversation.
- Plain words, short sentences, no filler.
- Keep anything your teammate marked as a hard requirement."#;

const WRITER_REMINDER: &str =
    "Produce usable text, not a summary of the discussion. Plain words, short sentences.";
