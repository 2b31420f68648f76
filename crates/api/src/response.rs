//! Webhook response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::ingress::EventReply;

/// Reply to a modal submission.
#[derive(Debug, Serialize)]
#[serde(tag = "response_action", rename_all = "snake_case")]
pub enum ViewResponse {
    /// Close the modal.
    Clear,
    /// Keep the modal open with messages under the offending blocks.
    Errors { errors: BTreeMap<String, String> },
}

impl ViewResponse {
    /// Single error shown under one block.
    pub fn error(block_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(block_id.into(), message.into());
        Self::Errors { errors }
    }
}

impl IntoResponse for ViewResponse {
    fn into_response(self) -> Response {
        // The platform only renders response actions on 200
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Handshake echo body.
#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    /// Challenge copied from the request.
    pub challenge: String,
}

impl IntoResponse for EventReply {
    fn into_response(self) -> Response {
        match self {
            Self::Challenge(challenge) => Json(ChallengeResponse { challenge }).into_response(),
            Self::Accepted { .. } | Self::Ignored => ok().into_response(),
        }
    }
}

/// Empty acknowledgement.
#[must_use]
pub fn ok() -> impl IntoResponse {
    StatusCode::OK
}
