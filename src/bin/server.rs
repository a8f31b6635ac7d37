//! Headless agent manager
//!
//! Runs the trigger scheduler, the health monitor and the webhook receiver
//! until Ctrl-C.
//!
//! Environment variables:
//!   - AGENT_MANAGER_HOME: config/ and logs/ root (default: ~/.agentica)
//!   - AGENTS_ROOT: agent folders (default: $AGENT_MANAGER_HOME/AGENTS)
//!   - AGENT_MANAGER_WEBHOOK_HOST: receiver bind address (default: 127.0.0.1)
//!   - AGENT_MANAGER_WEBHOOK_PORT: receiver port, or "off" (default: 8765)
//!   - RUST_LOG: log filter (default: info)

use agentica_core::AgentManager;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let manager = match AgentManager::from_env() {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = manager.ensure_started().await {
        error!(error = %e, "Failed to start agent manager");
        manager.shutdown().await;
        std::process::exit(1);
    }

    let config = &manager.context().config;
    info!(
        home = %config.home.display(),
        agents_root = %config.agents_root.display(),
        agents = manager.list_agents().len(),
        "Agent manager running"
    );
    if let Some(addr) = manager.webhook_addr().await {
        info!(addr = %addr, "Webhook receiver ready");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutting down");
    manager.shutdown().await;
}
