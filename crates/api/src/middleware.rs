//! API middleware.

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use emojibot_common::{AppError, SignatureValidator};
use emojibot_queue::EmojiWorker;
use std::sync::Arc;
use tracing::debug;

use crate::ingress::WebhookIngress;
use crate::payload::EventEnvelope;

/// Largest webhook body read for verification.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Request signature check.
    pub signatures: Arc<SignatureValidator>,
    /// Job producer.
    pub ingress: WebhookIngress,
    /// Present when jobs arrive through `POST /process`.
    pub worker: Option<Arc<EmojiWorker>>,
}

/// Signature verification middleware.
///
/// Buffers the body, verifies it against the signature headers and hands
/// the same bytes on. Every failure yields the same generic 401.
pub async fn verify_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_WEBHOOK_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return AppError::BadRequest(format!("Unreadable body: {e}")).into_response(),
    };

    if let Err(reason) = state.signatures.validate(&bytes, &parts.headers, Utc::now()) {
        // Handshakes may arrive unsigned
        if EventEnvelope::is_handshake(&bytes) {
            debug!(reason = %reason, "Accepting unsigned handshake");
        } else {
            return AppError::AuthenticationFailed(reason.to_string()).into_response();
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
