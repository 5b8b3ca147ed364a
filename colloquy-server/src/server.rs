//! Server bootstrap and shared state.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use colloquy_agents::SessionRegistry;
use colloquy_agents::archive::Archive;
use colloquy_agents::gateway::{AnthropicGateway, CompletionGateway, ScriptedGateway};
use colloquy_agents::roster::Roster;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{GatewayKind, ServerConfig};

/// State shared by every connection and request handler.
pub struct SharedState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub archive: Option<Arc<Archive>>,
    pub started_at: Instant,
    /// Source of connection ids for log correlation.
    pub next_connection: AtomicU64,
}

pub struct Server {
    config: ServerConfig,
    gateway: Option<Arc<dyn CompletionGateway>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            gateway: None,
        }
    }

    /// Create a server with a custom completion gateway (for testing).
    pub fn with_gateway(config: ServerConfig, gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            config,
            gateway: Some(gateway),
        }
    }

    fn gateway(&self) -> Result<Arc<dyn CompletionGateway>> {
        if let Some(gateway) = &self.gateway {
            return Ok(gateway.clone());
        }
        match self.config.gateway {
            GatewayKind::Anthropic => {
                let Some(key) = self.config.api_key.clone().filter(|k| !k.is_empty()) else {
                    bail!("the anthropic gateway needs --api-key or ANTHROPIC_API_KEY");
                };
                tracing::info!(model = %self.config.model, "Using Anthropic gateway");
                Ok(Arc::new(
                    AnthropicGateway::new(key)
                        .with_model(&self.config.model)
                        .with_max_tokens(self.config.max_tokens),
                ))
            }
            GatewayKind::Scripted => {
                tracing::info!("Using scripted gateway");
                Ok(Arc::new(ScriptedGateway::demo()))
            }
        }
    }

    /// Build SharedState, opening the archive if one is configured.
    fn build_state(&self) -> Result<Arc<SharedState>> {
        let archive = match &self.config.archive_db {
            Some(path) => {
                tracing::info!("Opening archive: {path}");
                let archive = Archive::open(Path::new(path))
                    .with_context(|| format!("Failed to open archive {path}"))?;
                Some(Arc::new(archive))
            }
            None => None,
        };

        let mut registry = SessionRegistry::new(Roster::builtin(), self.gateway()?, self.config.workflow());
        if let Some(archive) = &archive {
            registry = registry.with_archive(archive.clone());
        }

        Ok(Arc::new(SharedState {
            config: self.config.clone(),
            registry,
            archive,
            started_at: Instant::now(),
            next_connection: AtomicU64::new(1),
        }))
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> Result<()> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        tracing::info!("HTTP/WebSocket listener on {}", listener.local_addr()?);
        axum::serve(listener, crate::web::router(state)).await?;
        Ok(())
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let state = self.build_state()?;
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let router = crate::web::router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await?;
            anyhow::Ok(())
        });
        Ok((addr, handle))
    }
}
