//! Emoji generation worker.
//!
//! Turns one queued job into a delivered emoji and decides whether the
//! transport should acknowledge the message or redeliver it.

use apalis::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

use emojibot_common::{AppError, AppResult};
use emojibot_core::{
    Acknowledgement, ChatPlatformService, DeadLetterService, DuplicateGuardService, EmojiGenerationJob,
    EmojiName, GeneratedArtifact, ImagePostProcessor, ImageProviderFactory, SharingStrategyService, notify_requester,
};

use crate::envelope::PushEnvelope;
use crate::retry::DeliveryPolicy;

/// What happened to one delivery of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// At least one variant reached the user.
    Delivered { variants: usize },
    /// A previous delivery already completed this job.
    AlreadyDelivered,
    /// Images were generated but could not be shared.
    SharingFailed,
    /// Permanent failure; retrying cannot help.
    Failed { reason: String },
    /// Payload could not be decoded and was parked.
    DeadLettered,
    /// Temporary failure; the transport should redeliver.
    Retry { reason: String },
}

impl JobOutcome {
    /// Transport acknowledgement for this outcome.
    #[must_use]
    pub const fn acknowledgement(&self) -> Acknowledgement {
        match self {
            Self::Retry { .. } => Acknowledgement::Nack,
            _ => Acknowledgement::Ack,
        }
    }
}

/// Dependencies of the worker.
#[derive(Clone)]
pub struct EmojiWorker {
    /// Provider lookup.
    pub providers: Arc<dyn ImageProviderFactory>,
    /// Chat client for notifications.
    pub platform: ChatPlatformService,
    /// Delivery strategy for this workspace.
    pub sharing: SharingStrategyService,
    /// Image post-processing.
    pub post_processor: ImagePostProcessor,
    /// Where undecodable payloads go.
    pub dead_letters: DeadLetterService,
    /// Redelivery suppression.
    pub duplicates: DuplicateGuardService,
    /// Budget for one delivery.
    pub job_timeout: Duration,
    /// Final-attempt detection.
    pub delivery_policy: DeliveryPolicy,
}

impl EmojiWorker {
    /// Handle a push delivery body.
    ///
    /// A body that is not a push envelope is parked like any other
    /// undecodable payload; redelivering it cannot succeed.
    pub async fn handle_push(&self, body: &[u8]) -> JobOutcome {
        let envelope = match PushEnvelope::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => return self.dead_letter(body, &e.to_string()).await,
        };
        let attempt = envelope.attempt();
        info!(message_id = %envelope.message_id(), attempt, "Push delivery received");

        match envelope.message.payload() {
            Ok(payload) => self.handle_payload(&payload, attempt).await,
            Err(e) => self.dead_letter(envelope.message.data.as_bytes(), &e.to_string()).await,
        }
    }

    /// Decode a raw job payload and process it.
    pub async fn handle_payload(&self, payload: &[u8], attempt: u32) -> JobOutcome {
        match EmojiGenerationJob::from_bytes(payload) {
            Ok(job) => self.process(job, attempt).await,
            Err(e) => self.dead_letter(payload, &e.to_string()).await,
        }
    }

    async fn dead_letter(&self, payload: &[u8], reason: &str) -> JobOutcome {
        error!(reason = %reason, "Undecodable job payload");
        match self.dead_letters.dead_letter(payload, reason).await {
            Ok(()) => JobOutcome::DeadLettered,
            // Keep the message so the transport's own dead-letter policy catches it
            Err(e) => JobOutcome::Retry {
                reason: format!("Dead-letter publish failed: {e}"),
            },
        }
    }

    /// Process one delivery of a decoded job.
    pub async fn process(&self, job: EmojiGenerationJob, attempt: u32) -> JobOutcome {
        let span = info_span!(
            "emoji_job",
            job_id = %job.job_id(),
            trace_id = %job.trace_id(),
            provider = %job.provider,
            attempt,
        );
        self.process_inner(job, attempt).instrument(span).await
    }

    async fn process_inner(&self, mut job: EmojiGenerationJob, attempt: u32) -> JobOutcome {
        job.record_delivery_attempt(attempt);

        match self.duplicates.was_delivered(job.job_id()).await {
            Ok(true) => {
                info!("Job already delivered, acknowledging duplicate");
                return JobOutcome::AlreadyDelivered;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Duplicate check unavailable, processing anyway"),
        }

        if let Err(e) = job.mark_processing() {
            warn!(error = %e, status = ?job.status(), "Unexpected job status on arrival");
        }

        let delivered = AtomicUsize::new(0);
        let result = tokio::time::timeout(self.job_timeout, self.run(&job, &delivered)).await;
        let outcome = match result {
            Ok(Ok(variants)) => self.delivered(&mut job, variants).await,
            Err(_) if delivered.load(Ordering::SeqCst) > 0 => {
                let variants = delivered.load(Ordering::SeqCst);
                warn!(
                    delivered = variants,
                    requested = job.variants(),
                    "Job budget exceeded after partial delivery"
                );
                self.delivered(&mut job, variants).await
            }
            Ok(Err(AppError::SharingFailed(reason))) => {
                // Generation succeeded; redelivering would only repeat the same share failure
                self.finish(&mut job, true);
                warn!(reason = %reason, "Sharing failed");
                self.notify(
                    &job,
                    &format!(
                        "Your emoji `:{}:` was created but could not be shared here. \
                         Check that the bot is a member of this channel and try again.",
                        job.emoji_name
                    ),
                )
                .await;
                JobOutcome::SharingFailed
            }
            Ok(Err(e)) if e.is_retryable() => self.retry_or_give_up(&mut job, attempt, &e).await,
            Ok(Err(e)) => {
                self.finish(&mut job, false);
                error!(error = %e, "Job failed permanently");
                self.notify(&job, &failure_message(&job, &e)).await;
                JobOutcome::Failed { reason: e.to_string() }
            }
            Err(_) => {
                let e = AppError::TransientProvider(format!(
                    "Job exceeded {}s budget",
                    self.job_timeout.as_secs()
                ));
                self.retry_or_give_up(&mut job, attempt, &e).await
            }
        };

        info!(outcome = ?outcome, status = ?job.status(), retry_count = job.retry_count(), "Job handled");
        outcome
    }

    /// Generate, post-process and share every variant.
    ///
    /// Variants succeed or fail independently. Once one has reached the user
    /// the job counts as delivered; otherwise the first failure is returned.
    /// `delivered` is bumped as each variant is shared so a caller that gives
    /// up early still knows what the user has seen.
    async fn run(&self, job: &EmojiGenerationJob, delivered: &AtomicUsize) -> AppResult<usize> {
        let provider = self.providers.create(job.provider)?;
        let artifacts = provider.generate_variants(&job.prompt(), job.variants()).await?;
        let produced = artifacts.len();
        info!(
            produced,
            requested = job.variants(),
            fallback = artifacts.iter().any(|a| a.is_fallback),
            "Images generated"
        );

        let mut first_error = None;
        for (index, artifact) in artifacts.into_iter().enumerate() {
            match self.deliver_variant(job, index, artifact).await {
                Ok(()) => {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!(variant = index + 1, error = %e, "Variant not delivered");
                    first_error.get_or_insert(e);
                }
            }
        }

        match (delivered.load(Ordering::SeqCst), first_error) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(AppError::TransientProvider("Provider returned no images".to_string())),
            (count, failed) => {
                if failed.is_some() {
                    warn!(delivered = count, produced, "Some variants were not delivered");
                }
                Ok(count)
            }
        }
    }

    async fn deliver_variant(
        &self,
        job: &EmojiGenerationJob,
        index: usize,
        artifact: GeneratedArtifact,
    ) -> AppResult<()> {
        let size = job.sharing_preferences.image_size;
        let processor = self.post_processor;
        let processed = tokio::task::spawn_blocking(move || processor.process(&artifact, size))
            .await
            .map_err(|e| AppError::Internal(format!("Post-processing task failed: {e}")))??;

        let name = variant_name(&job.emoji_name, index);
        let outcome = self.sharing.share(job, &name, &processed).await?;
        info!(
            emoji = %name,
            strategy = ?outcome.strategy,
            fell_back = outcome.fell_back,
            bytes = processed.image_bytes().len(),
            "Variant delivered"
        );
        Ok(())
    }

    async fn delivered(&self, job: &mut EmojiGenerationJob, variants: usize) -> JobOutcome {
        self.finish(job, true);
        if let Err(e) = self.duplicates.mark_delivered(job.job_id()).await {
            warn!(error = %e, "Failed to record delivery");
        }
        JobOutcome::Delivered { variants }
    }

    async fn retry_or_give_up(&self, job: &mut EmojiGenerationJob, attempt: u32, e: &AppError) -> JobOutcome {
        if self.delivery_policy.is_final_attempt(attempt) {
            // The transport will not try again; close the job and tell the user
            self.finish(job, false);
            error!(error = %e, attempt, "Retryable failure on final attempt");
            self.notify(job, &failure_message(job, e)).await;
        } else {
            warn!(
                error = %e,
                attempt,
                remaining = self.delivery_policy.remaining_after(attempt),
                "Retryable failure, requesting redelivery"
            );
        }
        JobOutcome::Retry { reason: e.to_string() }
    }

    fn finish(&self, job: &mut EmojiGenerationJob, completed: bool) {
        let result = if completed { job.mark_completed() } else { job.mark_failed() };
        if let Err(e) = result {
            warn!(error = %e, "Could not record final job status");
        }
    }

    async fn notify(&self, job: &EmojiGenerationJob, text: &str) {
        if let Err(e) = notify_requester(self.platform.as_ref(), &job.origin_id, &job.requester_id, text).await {
            warn!(error = %e, "Failed to notify requester");
        }
    }
}

/// Name for the `index`th variant: the requested name, then `name_2`, `name_3`...
fn variant_name(base: &EmojiName, index: usize) -> EmojiName {
    if index == 0 { base.clone() } else { base.numbered(index + 1) }
}

fn failure_message(job: &EmojiGenerationJob, e: &AppError) -> String {
    let name = &job.emoji_name;
    match e {
        AppError::RateLimitExceeded(_) => format!(
            "The {} image service is over its usage limit, so `:{name}:` could not be created. \
             Please try again later.",
            job.provider
        ),
        AppError::Configuration(_) => format!(
            "The {} image service is not set up for this workspace, so `:{name}:` could not be created. \
             Ask an admin to configure it or pick another provider.",
            job.provider
        ),
        AppError::TransientProvider(_) | AppError::ExternalService(_) | AppError::Queue(_) => format!(
            "`:{name}:` could not be created after several attempts. Please try again in a few minutes."
        ),
        _ => format!("Something went wrong while creating `:{name}:`."),
    }
}

/// apalis entry point for the Redis backend.
///
/// # Errors
/// Returns an error when the job should be retried.
pub async fn emoji_worker(job: EmojiGenerationJob, worker: Data<EmojiWorker>, attempt: Attempt) -> Result<(), Error> {
    // apalis counts from zero
    let attempt = u32::try_from(attempt.current()).unwrap_or(u32::MAX).saturating_add(1);

    match worker.process(job, attempt).await {
        JobOutcome::Retry { reason } => Err(Error::Failed(Arc::new(Box::new(AppError::TransientProvider(reason))))),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgement_mapping() {
        assert_eq!(JobOutcome::Delivered { variants: 1 }.acknowledgement(), Acknowledgement::Ack);
        assert_eq!(JobOutcome::SharingFailed.acknowledgement(), Acknowledgement::Ack);
        assert_eq!(JobOutcome::DeadLettered.acknowledgement(), Acknowledgement::Ack);
        assert_eq!(
            JobOutcome::Failed { reason: "x".into() }.acknowledgement(),
            Acknowledgement::Ack
        );
        assert_eq!(
            JobOutcome::Retry { reason: "x".into() }.acknowledgement(),
            Acknowledgement::Nack
        );
    }

    #[test]
    fn test_variant_names() {
        let base = EmojiName::parse("party_cat").unwrap();
        assert_eq!(variant_name(&base, 0).as_str(), "party_cat");
        assert_eq!(variant_name(&base, 1).as_str(), "party_cat_2");
        assert_eq!(variant_name(&base, 3).as_str(), "party_cat_4");
    }

    #[test]
    fn test_variant_names_stay_distinct_at_length_limit() {
        let base = EmojiName::parse(&"z".repeat(100)).unwrap();
        let names: Vec<EmojiName> = (0..4).map(|i| variant_name(&base, i)).collect();
        for (i, a) in names.iter().enumerate() {
            assert!(a.as_str().len() <= 100);
            assert!(names[i + 1..].iter().all(|b| b != a));
        }
    }
}
