//! Event subscription endpoint.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
};
use emojibot_common::AppError;

use crate::ingress::EventRetry;
use crate::middleware::AppState;
use crate::payload::EventEnvelope;

const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

fn retry_info(headers: &HeaderMap) -> EventRetry {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    EventRetry {
        attempt: header(RETRY_NUM_HEADER).and_then(|v| v.parse().ok()),
        reason: header(RETRY_REASON_HEADER).map(ToString::to_string),
    }
}

/// Handle an event delivery.
async fn events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return AppError::BadRequest(format!("Invalid event body: {e}")).into_response(),
    };

    match state.ingress.handle_event(envelope, &retry_info(&headers)).await {
        Ok(reply) => reply.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Event ingestion route.
pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(events))
}
