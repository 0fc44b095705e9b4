//! Webhook signature verification.
//!
//! Senders sign the raw request body with HMAC keyed by the shared secret and
//! put the hex digest in a header:
//! - `X-Hub-Signature: sha1=<hex>`
//! - `X-Hub-Signature-256: sha256=<hex>` (preferred when present)

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use crate::web::error::WebhookError;
use crate::web::handlers::AppState;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";
pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";

/// Digest algorithm named by the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    Sha1,
    Sha256,
}

impl SignatureScheme {
    /// The `<scheme>=` prefix that must lead the header value.
    pub fn prefix(self) -> &'static str {
        match self {
            SignatureScheme::Sha1 => "sha1=",
            SignatureScheme::Sha256 => "sha256=",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature does not start with {expected:?}")]
    MissingPrefix { expected: &'static str },

    #[error("signature digest is not lowercase hex")]
    InvalidEncoding,

    #[error("invalid signing key")]
    InvalidKey,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a signature header value against the raw body.
///
/// # Arguments
///
/// * `scheme` - Digest algorithm the header claims
/// * `secret` - The shared webhook secret
/// * `signature` - Header value, e.g. `sha1=0b7c...`
/// * `body` - The exact request body bytes
///
/// The digest comparison is constant-time.
pub fn verify_signature(
    scheme: SignatureScheme,
    secret: &str,
    signature: &str,
    body: &[u8],
) -> Result<(), SignatureError> {
    let digest = signature
        .strip_prefix(scheme.prefix())
        .ok_or(SignatureError::MissingPrefix {
            expected: scheme.prefix(),
        })?;

    // Digest must be lowercase hex; a case-flipped header does not verify.
    if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(SignatureError::InvalidEncoding);
    }
    let expected = hex::decode(digest).map_err(|_| SignatureError::InvalidEncoding)?;

    let verified = match scheme {
        SignatureScheme::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .map_err(|_| SignatureError::InvalidKey)?;
            mac.update(body);
            mac.verify_slice(&expected)
        }
        SignatureScheme::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| SignatureError::InvalidKey)?;
            mac.update(body);
            mac.verify_slice(&expected)
        }
    };

    verified.map_err(|_| SignatureError::Mismatch)
}

/// Pick the signature header to check, preferring SHA-256.
///
/// Returns `None` when neither header is present or readable.
pub fn signature_from_headers(headers: &HeaderMap) -> Option<(SignatureScheme, String)> {
    [
        (SignatureScheme::Sha256, SIGNATURE_256_HEADER),
        (SignatureScheme::Sha1, SIGNATURE_HEADER),
    ]
    .into_iter()
    .find_map(|(scheme, name)| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| (scheme, v.to_string()))
    })
}

/// Middleware rejecting requests whose body signature does not verify.
///
/// The body is buffered to compute the HMAC and then handed on unchanged.
/// Without a configured secret every request passes through.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, WebhookError> {
    if !state.config.signature_enabled() {
        return Ok(next.run(request).await);
    }
    let secret = state.config.secret.as_str();

    let Some((scheme, signature)) = signature_from_headers(request.headers()) else {
        warn!("signature_missing");
        return Err(WebhookError::Unauthorized);
    };

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| {
            warn!(error = %e, "request_body_unreadable");
            WebhookError::Body(e.to_string())
        })?;

    if let Err(e) = verify_signature(scheme, secret, &signature, &bytes) {
        warn!(
            scheme = ?scheme,
            error = %e,
            body_length = bytes.len(),
            "signature_invalid"
        );
        return Err(WebhookError::Unauthorized);
    }

    debug!(scheme = ?scheme, "signature_verified");

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
