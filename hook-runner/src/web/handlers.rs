//! Webhook endpoint handler.
//!
//! Every method and path lands here. The handler only buffers the body and
//! hands it to the dispatcher; decoding, lookup and script runs happen there.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
};
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::web::error::WebhookError;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::new(config.script_table());
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Webhook event endpoint.
///
/// Returns 200 with an empty body once every script for the ref has exited
/// successfully.
pub async fn handle_event(
    State(state): State<AppState>,
    request: Request,
) -> Result<StatusCode, WebhookError> {
    info!(
        method = %request.method(),
        path = %request.uri().path(),
        "webhook_received"
    );

    let body = axum::body::to_bytes(request.into_body(), state.config.max_body_bytes)
        .await
        .map_err(|e| WebhookError::Body(e.to_string()))?;

    // Run detached so a dropped connection cannot interrupt a batch or
    // release the lock while a script is still running.
    let dispatcher = Arc::clone(&state.dispatcher);
    let outcome = run_detached(async move { dispatcher.dispatch(&body).await }).await?;

    match outcome {
        Ok(count) => {
            info!(script_count = count, "webhook_handled");
            Ok(StatusCode::OK)
        }
        Err(e) => {
            error!(error = %e, "webhook_dispatch_failed");
            Err(e.into())
        }
    }
}

/// Run `future` on its own task and wait for it.
///
/// A panic inside the task is re-raised here, so the panic guard around the
/// router handles it like any other handler panic.
pub(crate) async fn run_detached<F>(future: F) -> Result<F::Output, WebhookError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(output) => Ok(output),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            error!(error = %e, "webhook_dispatch_cancelled");
            Err(WebhookError::Cancelled)
        }
    }
}
