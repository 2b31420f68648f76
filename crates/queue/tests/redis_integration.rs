//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use emojibot_common::IdGenerator;
use emojibot_core::{DeadLetterSink, DuplicateGuard};
use emojibot_queue::{RedisDeadLetterSink, RedisDuplicateGuard};
use fred::interfaces::{ClientLike, KeysInterface, ListInterface};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn connect() -> Arc<fred::clients::Client> {
    let config = fred::types::config::Config::from_url(&get_redis_url()).expect("Invalid REDIS_URL");
    let client = fred::clients::Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await.expect("Failed to connect to Redis");
    Arc::new(client)
}

/// Test that a delivered job is remembered.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_duplicate_guard_roundtrip() {
    let redis = connect().await;
    let prefix = format!("emojibot-test-{}", IdGenerator::new().job_id());
    let guard = RedisDuplicateGuard::new(redis.clone(), prefix.clone()).with_window(60);
    let job_id = IdGenerator::new().job_id();

    assert!(!guard.was_delivered(&job_id).await.unwrap());
    guard.mark_delivered(&job_id).await.unwrap();
    guard.mark_delivered(&job_id).await.unwrap();
    assert!(guard.was_delivered(&job_id).await.unwrap());

    let _: i64 = redis.del(format!("{prefix}:delivered:{job_id}")).await.unwrap();
}

/// Test that dead letters land in the list.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_dead_letter_list() {
    let redis = connect().await;
    let prefix = format!("emojibot-test-{}", IdGenerator::new().job_id());
    let sink = RedisDeadLetterSink::new(redis.clone(), &prefix);

    sink.dead_letter(b"{broken", "invalid json").await.unwrap();

    let key = format!("{prefix}:dead_letters");
    let len: i64 = redis.llen(key.as_str()).await.unwrap();
    assert_eq!(len, 1);

    let _: i64 = redis.del(key.as_str()).await.unwrap();
}
