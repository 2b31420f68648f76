//! API endpoints.

mod events;
mod health;
mod interactive;
mod process;

use axum::{Router, middleware};

use crate::middleware::{AppState, verify_signature};

/// Routes that require a signed request.
pub fn webhook_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(events::router())
        .merge(interactive::router())
        .route_layer(middleware::from_fn_with_state(state, verify_signature))
}

/// Create the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(webhook_router(state.clone()))
        .merge(process::router())
        .merge(health::router())
        .with_state(state)
}
