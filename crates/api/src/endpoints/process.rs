//! Push queue delivery endpoint.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use emojibot_common::AppError;

use crate::middleware::AppState;

/// Handle one pushed message. A 2xx status acknowledges it; anything else
/// leaves it for redelivery.
///
/// The route does no authentication itself; the push subscription must be
/// authenticated in front of it.
async fn process(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(worker) = state.worker.as_ref() else {
        return AppError::Configuration("Push processing is not enabled".to_string()).into_response();
    };

    let outcome = worker.handle_push(&body).await;
    let status = if outcome.acknowledgement().is_ack() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(outcome)).into_response()
}

/// Push delivery route.
pub fn router() -> Router<AppState> {
    Router::new().route("/process", post(process))
}
