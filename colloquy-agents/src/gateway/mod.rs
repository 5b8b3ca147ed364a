//! Completion gateways: the text-generation backends agents speak through.
//!
//! A gateway turns (instruction, bounded context) into a lazy, finite stream
//! of text fragments. The stream ends on natural completion or on the first
//! error; gateways never retry.

mod anthropic;
mod scripted;

use futures::stream::BoxStream;

use crate::error::GatewayError;
use crate::prompt::TurnContext;

pub use anthropic::{AnthropicGateway, SseDecoder, SseEvent};
pub use scripted::{Script, ScriptedGateway};

/// Fragments of one turn's output, in generation order.
pub type FragmentStream = BoxStream<'static, Result<String, GatewayError>>;

/// Everything a gateway needs for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Roster name of the agent speaking.
    pub speaker: String,
    /// System instruction for the speaker's role.
    pub instruction: String,
    pub context: TurnContext,
}

pub trait CompletionGateway: Send + Sync {
    fn stream(&self, request: CompletionRequest) -> FragmentStream;
}
