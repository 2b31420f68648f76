//! Duplicate delivery suppression.
//!
//! At-least-once transports may hand the same job to the worker twice.
//! Once a job's artifact reaches the user its id is remembered, and later
//! deliveries are acknowledged without regenerating.

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::{Expiration, SetOptions};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use emojibot_common::{AppError, AppResult};
use emojibot_core::DuplicateGuard;

/// How long delivered job ids are remembered: 48 hours.
pub const DEFAULT_DEDUPE_WINDOW_SECS: i64 = 48 * 60 * 60;

/// Redis-backed guard shared by all worker instances.
#[derive(Clone)]
pub struct RedisDuplicateGuard {
    redis: Arc<RedisClient>,
    prefix: String,
    window_secs: i64,
}

impl RedisDuplicateGuard {
    /// Guard storing markers under `prefix`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            window_secs: DEFAULT_DEDUPE_WINDOW_SECS,
        }
    }

    /// Override how long a marker is kept.
    #[must_use]
    pub const fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    fn key(&self, job_id: &str) -> String {
        format!("{}:delivered:{job_id}", self.prefix)
    }
}

#[async_trait]
impl DuplicateGuard for RedisDuplicateGuard {
    async fn was_delivered(&self, job_id: &str) -> AppResult<bool> {
        let count: i64 = self
            .redis
            .exists(self.key(job_id))
            .await
            .map_err(|e| AppError::Queue(format!("Duplicate check failed: {e}")))?;
        Ok(count > 0)
    }

    async fn mark_delivered(&self, job_id: &str) -> AppResult<()> {
        // NX keeps the first delivery's expiry
        let result: Option<String> = self
            .redis
            .set(
                self.key(job_id),
                "1",
                Some(Expiration::EX(self.window_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| AppError::Queue(format!("Failed to record delivery: {e}")))?;

        if result.is_none() {
            debug!(job_id = %job_id, "Delivery was already recorded");
        }
        Ok(())
    }
}

/// Process-local guard.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDuplicateGuard {
    delivered: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryDuplicateGuard {
    /// Empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DuplicateGuard for InMemoryDuplicateGuard {
    async fn was_delivered(&self, job_id: &str) -> AppResult<bool> {
        Ok(self.delivered.read().await.contains(job_id))
    }

    async fn mark_delivered(&self, job_id: &str) -> AppResult<()> {
        self.delivered.write().await.insert(job_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_guard() {
        let guard = InMemoryDuplicateGuard::new();
        assert!(!guard.was_delivered("job-1").await.unwrap());

        guard.mark_delivered("job-1").await.unwrap();
        guard.mark_delivered("job-1").await.unwrap();

        assert!(guard.was_delivered("job-1").await.unwrap());
        assert!(!guard.was_delivered("job-2").await.unwrap());
    }
}
