//! Job transport and worker for emojibot.
//!
//! - **Transports**: push topic ([`PushTopicQueue`]), Redis via apalis
//!   ([`RedisJobQueue`]) and a process-local queue ([`InMemoryJobQueue`])
//! - **Worker**: [`EmojiWorker`] generates, post-processes and shares
//! - **Retry**: delivery policy and dead-letter storage
//! - **Dedup**: suppression of repeated deliveries

pub mod dedup;
pub mod envelope;
pub mod memory;
pub mod push;
pub mod redis_queue;
pub mod retry;
pub mod workers;

pub use dedup::{InMemoryDuplicateGuard, RedisDuplicateGuard};
pub use envelope::{PushEnvelope, PushMessage};
pub use memory::{InMemoryJobQueue, InMemoryReceiver};
pub use push::{PUBLISH_TIMEOUT, PushDeadLetterSink, PushTopicQueue, TopicPublisher};
pub use redis_queue::{EmojiJobStorage, RedisJobQueue};
pub use retry::{DeadLetterEntry, DeliveryPolicy, RedisDeadLetterSink};
pub use workers::*;
