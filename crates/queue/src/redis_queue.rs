//! Redis-backed job queue.
//!
//! Jobs are pushed into apalis-redis storage and consumed by the in-process
//! apalis worker ([`crate::workers::emoji_worker`]).

use apalis::prelude::*;
use async_trait::async_trait;
use emojibot_common::{AppError, AppResult};
use tracing::debug;

use emojibot_core::{EmojiGenerationJob, JobQueue};

/// Storage type shared by the producer and the worker.
pub type EmojiJobStorage = apalis_redis::RedisStorage<EmojiGenerationJob>;

/// [`JobQueue`] over apalis-redis storage.
#[derive(Clone)]
pub struct RedisJobQueue {
    storage: EmojiJobStorage,
}

impl RedisJobQueue {
    /// Queue backed by `storage`.
    #[must_use]
    pub const fn new(storage: EmojiJobStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()> {
        self.storage
            .clone()
            .push(job.clone())
            .await
            .map_err(|e| AppError::Queue(format!("Failed to queue job: {e}")))?;

        debug!(job_id = %job.job_id(), "Queued emoji job");
        Ok(())
    }
}
