//! Redelivery policy and dead-letter storage.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emojibot_common::{AppError, AppResult};
use fred::clients::Client as RedisClient;
use fred::interfaces::ListInterface;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use emojibot_core::DeadLetterSink;

/// How many times the transport redelivers a job before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total delivery attempts, including the first.
    pub max_attempts: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl DeliveryPolicy {
    /// Policy for a transport that delivers at most `max_attempts` times.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Whether the 1-based `attempt` is the last one the transport will make.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Retries left after the 1-based `attempt`.
    #[must_use]
    pub const fn remaining_after(&self, attempt: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt)
    }

    /// Retry count for in-process backends, which count the first run separately.
    #[must_use]
    pub const fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }
}

/// A payload that will never be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Raw payload, lossily decoded as UTF-8.
    pub payload: String,
    /// Why the payload was parked.
    pub reason: String,
    /// When it was parked.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Entry for `payload`, failed now.
    #[must_use]
    pub fn new(payload: &[u8], reason: &str) -> Self {
        Self {
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Dead-letter sink that appends entries to a Redis list.
#[derive(Clone)]
pub struct RedisDeadLetterSink {
    redis: Arc<RedisClient>,
    key: String,
}

impl RedisDeadLetterSink {
    /// Sink pushing onto a list under `prefix`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: &str) -> Self {
        Self {
            redis,
            key: format!("{prefix}:dead_letters"),
        }
    }
}

#[async_trait]
impl DeadLetterSink for RedisDeadLetterSink {
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> AppResult<()> {
        let entry = serde_json::to_string(&DeadLetterEntry::new(payload, reason))
            .map_err(|e| AppError::Internal(format!("Failed to encode dead letter: {e}")))?;
        let _: i64 = self
            .redis
            .rpush(self.key.as_str(), entry)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to store dead letter: {e}")))?;
        Ok(())
    }
}
