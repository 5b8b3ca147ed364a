//! Server configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use colloquy_agents::WorkflowConfig;

/// Which completion backend the agents speak through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GatewayKind {
    /// Claude Messages API (needs an API key).
    Anthropic,
    /// Canned replies, no network. For demos and tests.
    Scripted,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "colloquy-server", about = "Two-agent collaboration sessions with human review")]
pub struct ServerConfig {
    /// Address for HTTP and WebSocket connections
    #[arg(long, env = "COLLOQUY_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Completion backend
    #[arg(long, env = "COLLOQUY_GATEWAY", value_enum, default_value = "anthropic")]
    pub gateway: GatewayKind,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Claude model to use
    #[arg(long, env = "COLLOQUY_MODEL", default_value = "claude-sonnet-4-20250514")]
    pub model: String,

    /// Token limit per agent turn
    #[arg(long, env = "COLLOQUY_MAX_TOKENS", default_value_t = 1024)]
    pub max_tokens: u32,

    /// Agent turns per collaboration round
    #[arg(long, env = "COLLOQUY_ROUND_SIZE", default_value_t = 4)]
    pub round_size: usize,

    /// Transcript entries each agent sees
    #[arg(long, env = "COLLOQUY_CONTEXT_WINDOW", default_value_t = 6)]
    pub context_window: usize,

    /// Seconds a review waits before the session continues on its own
    #[arg(long, env = "COLLOQUY_REVIEW_TIMEOUT_SECS", default_value_t = 300)]
    pub review_timeout_secs: u64,

    /// Consecutive unanswered reviews before a session is closed
    #[arg(long, env = "COLLOQUY_MAX_UNATTENDED_ROUNDS", default_value_t = 3)]
    pub max_unattended_rounds: u32,

    /// SQLite path for finished conversations (archive disabled if unset)
    #[arg(long, env = "COLLOQUY_ARCHIVE_DB")]
    pub archive_db: Option<String>,

    /// Allowed CORS origin (repeatable)
    #[arg(long = "cors-origin", env = "COLLOQUY_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn workflow(&self) -> WorkflowConfig {
        WorkflowConfig {
            round_size: self.round_size.max(1),
            context_window: self.context_window,
            review_timeout: Duration::from_secs(self.review_timeout_secs),
            max_unattended_rounds: self.max_unattended_rounds.max(1),
            ..WorkflowConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            gateway: GatewayKind::Anthropic,
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            round_size: 4,
            context_window: 6,
            review_timeout_secs: 300,
            max_unattended_rounds: 3,
            archive_db: None,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_workflow_defaults() {
        let config = ServerConfig::try_parse_from(["colloquy-server", "--gateway", "scripted"]).unwrap();
        assert_eq!(config.gateway, GatewayKind::Scripted);
        assert_eq!(config.workflow(), WorkflowConfig::default());
    }

    #[test]
    fn flags_override_workflow() {
        let config = ServerConfig::try_parse_from([
            "colloquy-server",
            "--round-size",
            "2",
            "--review-timeout-secs",
            "10",
            "--cors-origin",
            "http://localhost:5173",
            "--cors-origin",
            "https://example.org",
        ])
        .unwrap();
        let workflow = config.workflow();
        assert_eq!(workflow.round_size, 2);
        assert_eq!(workflow.review_timeout, Duration::from_secs(10));
        assert_eq!(config.cors_origins.len(), 2);
    }
}
