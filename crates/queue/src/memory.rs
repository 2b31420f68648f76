//! Process-local queue.
//!
//! Jobs still travel as serialized bytes so the wire format is exercised the
//! same way as with the remote transports.

use async_trait::async_trait;
use emojibot_common::{AppError, AppResult};
use tokio::sync::{Mutex, mpsc};

use emojibot_core::{EmojiGenerationJob, JobQueue};

/// Producer half of the in-memory queue.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// Consumer half of the in-memory queue.
#[derive(Debug)]
pub struct InMemoryReceiver {
    receiver: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl InMemoryJobQueue {
    /// Create a connected producer and consumer.
    #[must_use]
    pub fn channel() -> (Self, InMemoryReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            InMemoryReceiver {
                receiver: Mutex::new(receiver),
            },
        )
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()> {
        let bytes = job.to_bytes()?;
        self.sender
            .send(bytes)
            .map_err(|_| AppError::Queue("In-memory queue consumer is gone".to_string()))
    }
}

impl InMemoryReceiver {
    /// Next raw payload; `None` once every producer is dropped.
    pub async fn recv_raw(&self) -> Option<Vec<u8>> {
        self.receiver.lock().await.recv().await
    }

    /// Next decoded job.
    pub async fn recv(&self) -> Option<AppResult<EmojiGenerationJob>> {
        self.recv_raw()
            .await
            .map(|bytes| EmojiGenerationJob::from_bytes(&bytes))
    }

    /// Payload waiting right now, without blocking.
    pub async fn try_recv_raw(&self) -> Option<Vec<u8>> {
        self.receiver.lock().await.try_recv().ok()
    }
}
