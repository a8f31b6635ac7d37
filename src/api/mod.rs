//! Embedded webhook HTTP receiver
//!
//! Accepts `POST <rule path>` and fires the matching webhook/github_push
//! triggers. Host and port come from `ManagerConfig`; binding to a
//! non-loopback host exposes rule paths to the network.

pub mod auth;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::scheduler::TriggerScheduler;

/// Handle to a running receiver
pub struct WebhookServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl WebhookServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "[Webhook] server task ended abnormally");
        }
        info!(addr = %self.addr, "[Webhook] receiver stopped");
    }
}

/// Bind and serve the receiver in a background task
///
/// Port 0 binds an ephemeral port; see `WebhookServer::local_addr`.
pub async fn start_server(
    host: &str,
    port: u16,
    scheduler: Arc<TriggerScheduler>,
) -> Result<WebhookServer, AppError> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| AppError::server_error(format!("Failed to bind {}:{}: {}", host, port, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| AppError::server_error(e.to_string()))?;

    if !addr.ip().is_loopback() {
        warn!(addr = %addr, "[Webhook] receiver reachable from the network");
    }

    let app = create_router(scheduler);
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!(error = %e, "[Webhook] server error");
        }
    });

    info!(addr = %addr, "[Webhook] receiver listening");
    Ok(WebhookServer {
        addr,
        shutdown: Some(tx),
        handle,
    })
}
