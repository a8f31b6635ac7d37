//! Webhook receiver routes
//!
//! Rule paths are user-defined, so every request lands in one fallback
//! handler that hands the raw path, headers and body to the scheduler.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use std::sync::Arc;
use tracing::debug;

use crate::scheduler::TriggerScheduler;

/// Create the webhook router
pub fn create_router(scheduler: Arc<TriggerScheduler>) -> Router {
    Router::new().fallback(deliver).with_state(scheduler)
}

async fn deliver(
    State(scheduler): State<Arc<TriggerScheduler>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string());
    }
    debug!(path = %uri.path(), bytes = body.len(), "[Webhook] delivery");
    let reply = scheduler.handle_webhook(uri.path(), &headers, &body).await;
    (reply.status, reply.message)
}
