//! Job workers.

mod emoji;

pub use emoji::{EmojiWorker, JobOutcome, emoji_worker};

use std::time::Duration;
use tracing::{info, warn};

use crate::memory::InMemoryReceiver;

/// Consume the in-memory queue until every producer is gone.
///
/// Nacked jobs are retried in place with a short backoff, up to the
/// worker's delivery policy.
pub async fn run_in_memory_worker(receiver: InMemoryReceiver, worker: EmojiWorker) {
    info!("In-memory worker started");
    while let Some(payload) = receiver.recv_raw().await {
        let worker = worker.clone();
        tokio::spawn(async move {
            let mut attempt = 1;
            loop {
                let outcome = worker.handle_payload(&payload, attempt).await;
                if outcome.acknowledgement().is_ack() || worker.delivery_policy.is_final_attempt(attempt) {
                    break;
                }
                let backoff = Duration::from_secs(1 << attempt.min(5));
                warn!(attempt, backoff_secs = backoff.as_secs(), "Retrying in-memory job");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        });
    }
    info!("In-memory worker stopped");
}
