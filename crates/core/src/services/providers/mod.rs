//! Image generation providers.
//!
//! Each provider pairs a primary model with a fallback model on the same
//! backend. A single generation walks that ordered attempt list:
//!
//! - success returns immediately,
//! - a rate-limit signal stops the walk and surfaces
//!   [`AppError::RateLimitExceeded`] (the fallback shares the same quota),
//! - a transient failure moves on to the next model.

mod factory;
mod gemini;
mod openai;

pub use factory::{ImageProviderFactory, ProviderFactory};
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use emojibot_common::{AppError, AppResult};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::GeneratedArtifact;
use crate::job::ProviderId;
use crate::services::media::decoded_dimensions;

/// Image bytes as returned by a backend.
#[derive(Clone)]
pub struct RawImage {
    /// Encoded image.
    pub bytes: Vec<u8>,
    /// MIME type reported by the backend.
    pub mime_type: String,
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Typed outcome of one model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Quota or rate limit reached.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network, 5xx or otherwise retryable failure.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// One model-level call against an AI backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Which provider this backend talks to.
    fn provider(&self) -> ProviderId;

    /// Generate exactly one image with the given model.
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<RawImage, ModelError>;
}

/// Primary and fallback model names for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPlan {
    /// Model tried first.
    pub primary: String,
    /// Model tried after a transient failure.
    pub fallback: String,
}

impl ModelPlan {
    /// Plan with the given model names.
    #[must_use]
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// Models in the order they are attempted, flagged with whether they are the fallback.
    fn attempts(&self) -> [(&str, bool); 2] {
        [(self.primary.as_str(), false), (self.fallback.as_str(), true)]
    }
}

/// An AI image backend as seen by the worker.
#[async_trait]
pub trait ImageGenerationProvider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> ProviderId;

    /// Generate `count` independent variants.
    ///
    /// Partial success returns the images that were produced; only a batch
    /// with zero successes is an error.
    async fn generate_variants(&self, prompt: &str, count: usize)
    -> AppResult<Vec<GeneratedArtifact>>;

    /// Generate a single image.
    async fn generate(&self, prompt: &str) -> AppResult<Vec<GeneratedArtifact>> {
        self.generate_variants(prompt, 1).await
    }
}

/// Shared provider handle.
pub type ImageProvider = Arc<dyn ImageGenerationProvider>;

/// Provider that runs a [`ModelPlan`] against a [`ModelBackend`].
pub struct FallbackProvider<B> {
    backend: B,
    plan: ModelPlan,
}

impl<B: ModelBackend> FallbackProvider<B> {
    /// Create a provider for `backend` with its model plan.
    pub const fn new(backend: B, plan: ModelPlan) -> Self {
        Self { backend, plan }
    }

    /// Models this provider walks.
    #[must_use]
    pub const fn plan(&self) -> &ModelPlan {
        &self.plan
    }

    /// Produce one artifact, walking the attempt list.
    pub async fn generate_one(&self, prompt: &str) -> AppResult<GeneratedArtifact> {
        let provider = self.backend.provider();
        let mut failures = Vec::with_capacity(2);

        for (model, is_fallback) in self.plan.attempts() {
            let result = self
                .backend
                .generate_image(model, prompt)
                .await
                .and_then(|raw| to_artifact(raw, provider, model, is_fallback));

            match result {
                Ok(artifact) => {
                    if is_fallback {
                        warn!(provider = %provider, model = %model, "Image produced by fallback model");
                    } else {
                        debug!(provider = %provider, model = %model, "Image produced by primary model");
                    }
                    return Ok(artifact);
                }
                Err(ModelError::RateLimited(message)) => {
                    warn!(provider = %provider, model = %model, error = %message, "Provider rate limit reached");
                    return Err(AppError::RateLimitExceeded(format!(
                        "{provider} ({model}): {message}"
                    )));
                }
                Err(ModelError::Transient(message)) => {
                    warn!(
                        provider = %provider,
                        model = %model,
                        is_fallback = is_fallback,
                        error = %message,
                        "Image model attempt failed"
                    );
                    failures.push(format!("{model}: {message}"));
                }
            }
        }

        Err(AppError::TransientProvider(format!(
            "{provider} exhausted all models ({})",
            failures.join("; ")
        )))
    }
}

#[async_trait]
impl<B: ModelBackend> ImageGenerationProvider for FallbackProvider<B> {
    fn id(&self) -> ProviderId {
        self.backend.provider()
    }

    async fn generate_variants(
        &self,
        prompt: &str,
        count: usize,
    ) -> AppResult<Vec<GeneratedArtifact>> {
        let count = count.max(1);
        let results = join_all((0..count).map(|_| self.generate_one(prompt))).await;

        let mut artifacts = Vec::with_capacity(count);
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => errors.push(e),
            }
        }

        if artifacts.is_empty() {
            // Prefer the rate-limit signal so the queue backs off
            let rate_limited = errors
                .iter()
                .position(|e| matches!(e, AppError::RateLimitExceeded(_)));
            let err = match rate_limited {
                Some(index) => errors.swap_remove(index),
                None => errors.into_iter().next().unwrap_or_else(|| {
                    AppError::TransientProvider("No images generated".to_string())
                }),
            };
            return Err(err);
        }

        if !errors.is_empty() {
            warn!(
                provider = %self.backend.provider(),
                requested = count,
                produced = artifacts.len(),
                "Returning partial batch of variants"
            );
        }

        Ok(artifacts)
    }
}

fn to_artifact(
    raw: RawImage,
    provider: ProviderId,
    model: &str,
    is_fallback: bool,
) -> Result<GeneratedArtifact, ModelError> {
    let (width, height) = decoded_dimensions(&raw.bytes)
        .ok_or_else(|| ModelError::Transient("response is not a decodable image".to_string()))?;

    GeneratedArtifact::new(raw.bytes, raw.mime_type, width, height, provider, model, is_fallback)
        .map_err(|e| ModelError::Transient(e.to_string()))
}

/// Map an HTTP failure from a backend onto a [`ModelError`].
///
/// 429 and quota error codes mean rate limiting; everything else is
/// treated as transient so the fallback model gets a chance.
pub(crate) fn classify_http_failure(status: reqwest::StatusCode, body: &str) -> ModelError {
    let lowered = body.to_lowercase();
    let quota_signal = lowered.contains("insufficient_quota")
        || lowered.contains("rate_limit_exceeded")
        || lowered.contains("resource_exhausted");

    let message = format!("HTTP {status}: {}", truncate(body, 300));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || quota_signal {
        ModelError::RateLimited(message)
    } else {
        ModelError::Transient(message)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::sample_png;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays scripted results and records the models it was asked for.
    pub(crate) struct ScriptedBackend {
        script: Mutex<VecDeque<Result<RawImage, ModelError>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Vec<Result<RawImage, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn ok() -> Result<RawImage, ModelError> {
            Ok(RawImage {
                bytes: sample_png(),
                mime_type: "image/png".to_string(),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn provider(&self) -> ProviderId {
            ProviderId::OpenAi
        }

        async fn generate_image(&self, model: &str, _prompt: &str) -> Result<RawImage, ModelError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Transient("script exhausted".to_string())))
        }
    }

    fn provider(script: Vec<Result<RawImage, ModelError>>) -> FallbackProvider<ScriptedBackend> {
        FallbackProvider::new(ScriptedBackend::new(script), ModelPlan::new("primary", "fallback"))
    }

    #[tokio::test]
    async fn test_primary_success() {
        let provider = provider(vec![ScriptedBackend::ok()]);
        let artifacts = provider.generate("a cat").await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert!(!artifacts[0].is_fallback);
        assert_eq!(artifacts[0].model, "primary");
        assert_eq!((artifacts[0].width_px, artifacts[0].height_px), (64, 48));
        assert_eq!(provider.backend.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_transient_primary_falls_back() {
        let provider = provider(vec![
            Err(ModelError::Transient("HTTP 503".to_string())),
            ScriptedBackend::ok(),
        ]);
        let artifacts = provider.generate("a cat").await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].is_fallback);
        assert_eq!(artifacts[0].model, "fallback");
        assert_eq!(provider.backend.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let provider = provider(vec![
            Err(ModelError::RateLimited("quota".to_string())),
            Err(ModelError::RateLimited("quota".to_string())),
        ]);
        let err = provider.generate("a cat").await.unwrap_err();

        assert!(matches!(err, AppError::RateLimitExceeded(_)));
        assert_eq!(provider.backend.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_rate_limit_on_fallback_is_surfaced() {
        let provider = provider(vec![
            Err(ModelError::Transient("timeout".to_string())),
            Err(ModelError::RateLimited("quota".to_string())),
        ]);
        let err = provider.generate("a cat").await.unwrap_err();

        assert!(matches!(err, AppError::RateLimitExceeded(_)));
        assert_eq!(provider.backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_both_models_fail() {
        let provider = provider(vec![
            Err(ModelError::Transient("500".to_string())),
            Err(ModelError::Transient("502".to_string())),
        ]);
        let err = provider.generate("a cat").await.unwrap_err();

        match err {
            AppError::TransientProvider(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("502"));
            }
            other => panic!("Expected TransientProvider, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_image_counts_as_transient() {
        let provider = provider(vec![
            Ok(RawImage {
                bytes: b"<html>oops</html>".to_vec(),
                mime_type: "image/png".to_string(),
            }),
            ScriptedBackend::ok(),
        ]);
        let artifacts = provider.generate("a cat").await.unwrap();
        assert!(artifacts[0].is_fallback);
    }

    #[tokio::test]
    async fn test_truncated_primary_image_falls_back() {
        let mut truncated = sample_png();
        truncated.truncate(60);
        let provider = provider(vec![
            Ok(RawImage {
                bytes: truncated,
                mime_type: "image/png".to_string(),
            }),
            ScriptedBackend::ok(),
        ]);

        let artifacts = provider.generate("a cat").await.unwrap();

        assert!(artifacts[0].is_fallback);
        assert_eq!(artifacts[0].image_bytes(), sample_png().as_slice());
        assert_eq!(provider.backend.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn test_partial_batch_is_returned() {
        // Variant 1: ok. Variant 2: primary + fallback fail. Variant 3: ok.
        let provider = provider(vec![
            ScriptedBackend::ok(),
            Err(ModelError::Transient("a".to_string())),
            Err(ModelError::Transient("b".to_string())),
            ScriptedBackend::ok(),
        ]);
        let artifacts = provider.generate_variants("a cat", 3).await.unwrap();
        assert_eq!(artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_prefers_rate_limit() {
        let provider = provider(vec![
            Err(ModelError::Transient("a".to_string())),
            Err(ModelError::Transient("b".to_string())),
            Err(ModelError::RateLimited("quota".to_string())),
        ]);
        let err = provider.generate_variants("a cat", 2).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded(_)));
    }

    #[test]
    fn test_classify_http_failure() {
        assert!(matches!(
            classify_http_failure(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ModelError::RateLimited(_)
        ));
        assert!(matches!(
            classify_http_failure(
                reqwest::StatusCode::FORBIDDEN,
                r#"{"error":{"code":"insufficient_quota"}}"#
            ),
            ModelError::RateLimited(_)
        ));
        assert!(matches!(
            classify_http_failure(reqwest::StatusCode::BAD_GATEWAY, "upstream"),
            ModelError::Transient(_)
        ));
    }
}
