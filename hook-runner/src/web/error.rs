//! Error type for the webhook endpoint and its middleware.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::dispatch::DispatchError;

/// Failures that end a webhook request early.
///
/// Responses are plain text: the standard status text for auth failures,
/// the raw error message for everything else.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Body(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("dispatch task was cancelled")]
    Cancelled,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::Body(_) | WebhookError::Dispatch(_) | WebhookError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
