//! Web server module for receiving webhook events.
//!
//! The router has a single catch-all route: any method, any path. Requests
//! pass through these layers, outermost first:
//! 1. Request tracing
//! 2. Panic guard (log and answer 500)
//! 3. Signature verification
//! 4. Event handler

pub mod error;
pub mod handlers;
pub mod signature;

use std::any::Any;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

pub use error::WebhookError;
pub use handlers::{handle_event, AppState};
pub use signature::{
    require_signature, signature_from_headers, verify_signature, SignatureError, SignatureScheme,
};

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", any(handle_event))
        .route("/*path", any(handle_event));

    with_middleware(routes, state)
}

fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state.clone(), require_signature))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn a panic raised while handling a request into a 500.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, "request_panicked");

    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
