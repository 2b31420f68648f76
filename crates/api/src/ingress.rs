//! Webhook ingress: turn verified requests into queued jobs.
//!
//! Everything here runs inside the platform's response deadline, so the only
//! I/O is the enqueue call and that is bounded by [`WebhookIngress::enqueue`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use emojibot_common::{AppError, AppResult, IdGenerator};
use emojibot_core::{
    EmojiGenerationJob, EmojiName, JobQueueService, NewJob, ProviderId, SharingPreferences,
    ThreadPlacement,
};

use crate::payload::{CallbackEvent, EventEnvelope};

static USER_MENTION: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern
    Regex::new(r"<@[A-Z0-9]+(\|[^>]*)?>").unwrap()
});

/// Fully-formed parameters for one job, as supplied by the interaction layer.
#[derive(Debug, Clone)]
pub struct EmojiRequest {
    /// Free-text description.
    pub description: String,
    /// Derived from the description when absent.
    pub emoji_name: Option<EmojiName>,
    /// The configured default is used when absent.
    pub provider: Option<ProviderId>,
    /// Placement, visibility and size.
    pub sharing_preferences: SharingPreferences,
    /// User who asked.
    pub requester_id: String,
    /// Channel the request came from.
    pub origin_id: String,
    /// Thread the request was made in.
    pub thread_ts: Option<String>,
    /// Text of the message the request was attached to.
    pub context_text: Option<String>,
    /// How many images to generate.
    pub variant_count: u8,
}

/// Result of an event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventReply {
    /// Echo for the endpoint handshake.
    Challenge(String),
    /// A job was queued.
    Accepted { job_id: String },
    /// Nothing to do for this event.
    Ignored,
}

/// Platform redelivery markers on an event request.
#[derive(Debug, Clone, Default)]
pub struct EventRetry {
    /// Redelivery number, absent on the first delivery.
    pub attempt: Option<u32>,
    /// Why the platform redelivered.
    pub reason: Option<String>,
}

impl EventRetry {
    /// Redelivery caused by our own slow response. The first delivery's
    /// enqueue keeps running past the deadline, so queueing again would
    /// duplicate the job.
    #[must_use]
    pub fn is_timeout_redelivery(&self) -> bool {
        self.attempt.is_some() && self.reason.as_deref() == Some("http_timeout")
    }
}

/// Builds jobs and hands them to the queue within the response deadline.
#[derive(Clone)]
pub struct WebhookIngress {
    queue: JobQueueService,
    ids: IdGenerator,
    default_provider: ProviderId,
    deadline: Duration,
}

impl WebhookIngress {
    /// Create an ingress enqueuing onto `queue` within `deadline`.
    #[must_use]
    pub fn new(queue: JobQueueService, default_provider: ProviderId, deadline: Duration) -> Self {
        Self {
            queue,
            ids: IdGenerator::new(),
            default_provider,
            deadline,
        }
    }

    /// Build a pending job with fresh job and trace ids.
    pub fn build_job(&self, request: EmojiRequest) -> AppResult<EmojiGenerationJob> {
        let description = request.description.trim().to_string();
        if description.is_empty() {
            return Err(AppError::Validation("Description is required".to_string()));
        }
        if request.origin_id.trim().is_empty() || request.requester_id.trim().is_empty() {
            return Err(AppError::BadRequest("Request has no channel or user".to_string()));
        }

        let emoji_name = match request.emoji_name {
            Some(name) => name,
            None => EmojiName::from_description(&description)?,
        };

        Ok(EmojiGenerationJob::create(
            &self.ids,
            NewJob {
                description,
                emoji_name,
                requester_id: request.requester_id,
                origin_id: request.origin_id,
                provider: request.provider.unwrap_or(self.default_provider),
                sharing_preferences: request.sharing_preferences,
                thread_ts: request.thread_ts,
                context_text: request.context_text,
                variant_count: request.variant_count,
            },
        ))
    }

    /// Build and enqueue a job.
    pub async fn submit(&self, request: EmojiRequest) -> AppResult<EmojiGenerationJob> {
        let job = self.build_job(request)?;
        self.enqueue(&job).await?;
        Ok(job)
    }

    /// Enqueue a job, returning no later than the ingress deadline.
    ///
    /// When the deadline passes first the enqueue keeps running in the
    /// background and the request is treated as accepted.
    pub async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()> {
        let span = info_span!("enqueue", job_id = %job.job_id(), trace_id = %job.trace_id());
        let queue = self.queue.clone();
        let pending = job.clone();

        let handle = tokio::spawn(
            async move {
                let result = queue.enqueue(&pending).await;
                match &result {
                    Ok(()) => info!(provider = %pending.provider, emoji = %pending.emoji_name, "Job enqueued"),
                    Err(e) => error!(error = %e, "Enqueue failed"),
                }
                result
            }
            .instrument(span),
        );

        match tokio::time::timeout(self.deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AppError::Internal(format!("Enqueue task failed: {e}"))),
            Err(_) => {
                warn!(
                    job_id = %job.job_id(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Ingress deadline reached, enqueue continues in background"
                );
                Ok(())
            }
        }
    }

    /// Handle a verified `POST /events` body.
    pub async fn handle_event(&self, envelope: EventEnvelope, retry: &EventRetry) -> AppResult<EventReply> {
        match envelope {
            EventEnvelope::UrlVerification { challenge } => {
                info!("Answering endpoint handshake");
                Ok(EventReply::Challenge(challenge))
            }
            EventEnvelope::EventCallback { event_id, event } => {
                if retry.is_timeout_redelivery() {
                    info!(event_id = ?event_id, attempt = ?retry.attempt, "Skipping timeout redelivery");
                    return Ok(EventReply::Ignored);
                }
                match self.request_from_event(&event) {
                    Some(request) => {
                        let job = self.submit(request).await?;
                        Ok(EventReply::Accepted {
                            job_id: job.job_id().to_string(),
                        })
                    }
                    None => {
                        debug!(event_id = ?event_id, kind = %event.kind, "Ignoring event");
                        Ok(EventReply::Ignored)
                    }
                }
            }
            EventEnvelope::Other => Ok(EventReply::Ignored),
        }
    }

    /// A mention of the bot asks for an emoji of the mention text, answered
    /// in the mention's thread.
    fn request_from_event(&self, event: &CallbackEvent) -> Option<EmojiRequest> {
        if event.kind != "app_mention" || event.bot_id.is_some() {
            return None;
        }

        let description = USER_MENTION
            .replace_all(event.text.as_deref()?, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if description.is_empty() {
            return None;
        }

        Some(EmojiRequest {
            description,
            emoji_name: None,
            provider: None,
            sharing_preferences: SharingPreferences {
                placement: ThreadPlacement::ExistingThread,
                ..SharingPreferences::default()
            },
            requester_id: event.user.clone()?,
            origin_id: event.channel.clone()?,
            thread_ts: event.thread_ts.clone().or_else(|| event.ts.clone()),
            context_text: None,
            variant_count: 1,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingQueue {
        jobs: Mutex<Vec<EmojiGenerationJob>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl emojibot_core::JobQueue for RecordingQueue {
        async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn ingress(queue: Arc<RecordingQueue>) -> WebhookIngress {
        WebhookIngress::new(queue, ProviderId::GoogleGemini, Duration::from_millis(100))
    }

    fn request() -> EmojiRequest {
        EmojiRequest {
            description: "  a sleepy sloth  ".to_string(),
            emoji_name: None,
            provider: None,
            sharing_preferences: SharingPreferences::default(),
            requester_id: "U1".to_string(),
            origin_id: "C1".to_string(),
            thread_ts: None,
            context_text: None,
            variant_count: 1,
        }
    }

    fn mention(text: &str) -> CallbackEvent {
        CallbackEvent {
            kind: "app_mention".to_string(),
            user: Some("U1".to_string()),
            text: Some(text.to_string()),
            channel: Some("C1".to_string()),
            ts: Some("1700000000.000200".to_string()),
            thread_ts: None,
            bot_id: None,
        }
    }

    #[test]
    fn test_build_job_applies_defaults() {
        let ingress = ingress(Arc::default());
        let job = ingress.build_job(request()).unwrap();

        assert_eq!(job.description, "a sleepy sloth");
        assert_eq!(job.emoji_name.as_str(), "a_sleepy_sloth");
        assert_eq!(job.provider, ProviderId::GoogleGemini);
        assert!(!job.trace_id().is_empty());
    }

    #[test]
    fn test_build_job_rejects_blank_description() {
        let ingress = ingress(Arc::default());
        let mut req = request();
        req.description = "   ".to_string();
        assert!(matches!(ingress.build_job(req), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_each_job_gets_fresh_ids() {
        let ingress = ingress(Arc::default());
        let a = ingress.build_job(request()).unwrap();
        let b = ingress.build_job(request()).unwrap();
        assert_ne!(a.job_id(), b.job_id());
        assert_ne!(a.trace_id(), b.trace_id());
    }

    #[tokio::test]
    async fn test_handshake_does_not_enqueue() {
        let queue = Arc::new(RecordingQueue::default());
        let reply = ingress(queue.clone())
            .handle_event(
                EventEnvelope::UrlVerification {
                    challenge: "abc123".to_string(),
                },
                &EventRetry::default(),
            )
            .await
            .unwrap();

        assert_eq!(reply, EventReply::Challenge("abc123".to_string()));
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mention_enqueues_threaded_job() {
        let queue = Arc::new(RecordingQueue::default());
        let envelope = EventEnvelope::EventCallback {
            event_id: Some("Ev1".to_string()),
            event: mention("<@U0BOT> a   happy cactus"),
        };

        let reply = ingress(queue.clone())
            .handle_event(envelope, &EventRetry::default())
            .await
            .unwrap();

        assert!(matches!(reply, EventReply::Accepted { .. }));
        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs[0].description, "a happy cactus");
        assert_eq!(jobs[0].thread_ts.as_deref(), Some("1700000000.000200"));
        assert_eq!(jobs[0].sharing_preferences.placement, ThreadPlacement::ExistingThread);
    }

    #[tokio::test]
    async fn test_empty_mention_and_bot_messages_are_ignored() {
        let queue = Arc::new(RecordingQueue::default());
        let ingress = ingress(queue.clone());

        let empty = EventEnvelope::EventCallback {
            event_id: None,
            event: mention("<@U0BOT>"),
        };
        assert_eq!(ingress.handle_event(empty, &EventRetry::default()).await.unwrap(), EventReply::Ignored);

        let mut from_bot = mention("<@U0BOT> a robot");
        from_bot.bot_id = Some("B1".to_string());
        let envelope = EventEnvelope::EventCallback {
            event_id: None,
            event: from_bot,
        };
        assert_eq!(ingress.handle_event(envelope, &EventRetry::default()).await.unwrap(), EventReply::Ignored);

        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_redelivery_is_skipped() {
        let queue = Arc::new(RecordingQueue::default());
        let retry = EventRetry {
            attempt: Some(1),
            reason: Some("http_timeout".to_string()),
        };
        let envelope = EventEnvelope::EventCallback {
            event_id: None,
            event: mention("<@U0BOT> a robot"),
        };

        let reply = ingress(queue.clone()).handle_event(envelope, &retry).await.unwrap();

        assert_eq!(reply, EventReply::Ignored);
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_enqueue_finishes_after_deadline() {
        let queue = Arc::new(RecordingQueue {
            jobs: Mutex::default(),
            delay: Some(Duration::from_secs(5)),
        });
        let ingress = ingress(queue.clone());

        let job = ingress.submit(request()).await.unwrap();
        assert!(queue.jobs.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id(), job.job_id());
    }
}
