//! Context assembly for a single turn, and the review prompt shown to the human.

use crate::error::PromptError;
use crate::model::{TurnRecord, WorkflowState};
use crate::roster::AgentProfile;

/// Number of trailing transcript entries handed to the next speaker.
pub const DEFAULT_CONTEXT_WINDOW: usize = 6;

/// One prior turn as the next speaker sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub speaker: String,
    pub content: String,
}

/// Bounded context for one gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnContext {
    pub task: String,
    /// Last `k` transcript entries, oldest first.
    pub window: Vec<ContextEntry>,
    /// Role framing appended after the window.
    pub directive: String,
}

impl TurnContext {
    /// Flatten into the single user message sent to the model.
    pub fn render(&self) -> String {
        let mut out = format!("## Task\n{}\n\n## Conversation so far\n", self.task);
        if self.window.is_empty() {
            out.push_str("(nothing yet; you speak first)\n");
        }
        for entry in &self.window {
            out.push_str(&format!("**{}**: {}\n\n", entry.speaker, entry.content));
        }
        out.push_str(&format!("\n## Your turn\n{}", self.directive));
        out
    }
}

/// Build the context for `speaker`'s next turn. Pure; no side effects.
pub fn build_context(
    transcript: &[TurnRecord],
    speaker: &AgentProfile,
    task: &str,
    window: usize,
) -> Result<TurnContext, PromptError> {
    if speaker.name.trim().is_empty() {
        return Err(PromptError::EmptyRole);
    }

    let start = transcript.len().saturating_sub(window);
    let window = transcript[start..]
        .iter()
        .map(|turn| ContextEntry {
            speaker: turn.speaker.clone(),
            content: turn.content.clone(),
        })
        .collect();

    let name = if speaker.display_name.trim().is_empty() {
        &speaker.name
    } else {
        &speaker.display_name
    };
    let directive = if speaker.reminder.trim().is_empty() {
        format!("You are {name}.")
    } else {
        format!("You are {name}. {}", speaker.reminder.trim())
    };

    Ok(TurnContext {
        task: task.to_string(),
        window,
        directive,
    })
}

/// Prompt shown to the human reviewer after a round: the tail of the
/// transcript plus the available decisions.
pub fn review_prompt(state: &WorkflowState, transcript: &[TurnRecord], tail: usize) -> String {
    let mut out = format!(
        "Round complete (iteration {}). Task: {}\n\n",
        state.iteration, state.task
    );
    let start = transcript.len().saturating_sub(tail);
    let recent = &transcript[start..];
    if recent.is_empty() {
        out.push_str("(the agents produced no output)\n\n");
    } else {
        out.push_str("Latest turns:\n");
        for turn in recent {
            out.push_str(&format!("- {}: {}\n", turn.speaker, excerpt(&turn.content, 280)));
        }
        out.push('\n');
    }
    out.push_str(
        "Reply with approve to finish, revise with feedback to iterate, \
         continue for another round, or cancel to discard.",
    );
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
