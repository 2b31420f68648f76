//! HTTP layer for emojibot.
//!
//! - **Webhooks**: `POST /events` and `POST /interactive`, behind request
//!   signature verification
//! - **Push delivery**: `POST /process`, one queued job per call
//! - **Health**: `GET /health`
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod form;
pub mod ingress;
pub mod middleware;
pub mod payload;
pub mod response;

pub use endpoints::router;
pub use ingress::{EmojiRequest, EventReply, EventRetry, WebhookIngress};
pub use middleware::AppState;
