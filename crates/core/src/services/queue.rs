//! Queue-facing abstractions.
//!
//! The ingress and worker only see these traits; the transports live in the
//! queue crate.

use async_trait::async_trait;
use emojibot_common::AppResult;
use std::sync::Arc;

use crate::job::EmojiGenerationJob;

/// Producer side of the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Serialize and hand the job to the transport.
    ///
    /// An error here means the request was not accepted and must be reported
    /// to the caller synchronously.
    async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()>;
}

/// Shared job queue handle.
pub type JobQueueService = Arc<dyn JobQueue>;

/// What the consumer tells the transport after handling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Remove the message.
    Ack,
    /// Leave the message for redelivery.
    Nack,
}

impl Acknowledgement {
    /// Whether the message should be removed.
    #[must_use]
    pub const fn is_ack(self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// Destination for payloads that must never be retried.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Park a raw payload together with the reason it was rejected.
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> AppResult<()>;
}

/// Shared dead-letter handle.
pub type DeadLetterService = Arc<dyn DeadLetterSink>;

/// Dead-letter sink that only records the payload in the logs.
#[derive(Debug, Clone, Default)]
pub struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> AppResult<()> {
        tracing::error!(
            reason = %reason,
            payload = %String::from_utf8_lossy(payload),
            "Dead-lettered queue payload"
        );
        Ok(())
    }
}

/// Best-effort suppression of repeated deliveries of the same job.
#[async_trait]
pub trait DuplicateGuard: Send + Sync {
    /// Whether an artifact was already delivered for this job.
    async fn was_delivered(&self, job_id: &str) -> AppResult<bool>;

    /// Remember that this job's artifact reached the user.
    async fn mark_delivered(&self, job_id: &str) -> AppResult<()>;
}

/// Shared duplicate guard handle.
pub type DuplicateGuardService = Arc<dyn DuplicateGuard>;
