use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (COLLOQUY_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("COLLOQUY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("colloquy_server=info".parse()?)
        .add_directive("colloquy_agents=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = colloquy_server::config::ServerConfig::parse();
    tracing::info!("Starting colloquy server on {}", config.listen_addr);
    if let Some(ref path) = config.archive_db {
        tracing::info!("Archiving finished conversations to {path}");
    }
    let server = colloquy_server::server::Server::new(config);
    server.run().await
}
