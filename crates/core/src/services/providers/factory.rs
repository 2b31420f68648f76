//! Construction of providers from configuration.

use emojibot_common::config::ProvidersConfig;
use emojibot_common::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

use super::{FallbackProvider, GeminiBackend, ImageProvider, OpenAiBackend};
use crate::job::ProviderId;

/// Source of providers for the worker.
pub trait ImageProviderFactory: Send + Sync {
    /// Build the provider for `id`.
    ///
    /// Fails with [`AppError::Configuration`] when its credentials are missing.
    fn create(&self, id: ProviderId) -> AppResult<ImageProvider>;
}

/// Factory backed by real HTTP clients.
#[derive(Clone)]
pub struct ProviderFactory {
    client: reqwest::Client,
    config: ProvidersConfig,
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("openai_configured", &self.config.openai_api_key.is_some())
            .field("google_configured", &self.config.google_api_key.is_some())
            .finish()
    }
}

impl ProviderFactory {
    /// Create a factory with one shared HTTP client.
    pub fn new(config: ProvidersConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("emojibot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create a factory reusing an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, config: ProvidersConfig) -> Self {
        Self { client, config }
    }

    /// Provider named in configuration for jobs that do not choose one.
    pub fn default_provider(&self) -> AppResult<ProviderId> {
        self.config
            .default_provider
            .parse()
            .map_err(|e: AppError| AppError::Configuration(e.to_string()))
    }
}

fn required_key(key: Option<&String>, name: &str) -> AppResult<String> {
    match key.map(|k| k.trim()) {
        Some(k) if !k.is_empty() => Ok(k.to_string()),
        _ => Err(AppError::Configuration(format!("{name} is not configured"))),
    }
}

impl ImageProviderFactory for ProviderFactory {
    fn create(&self, id: ProviderId) -> AppResult<ImageProvider> {
        let provider: ImageProvider = match id {
            ProviderId::OpenAi => {
                let key = required_key(self.config.openai_api_key.as_ref(), "OpenAI API key")?;
                Arc::new(FallbackProvider::new(
                    OpenAiBackend::new(self.client.clone(), key, &self.config.openai_base_url),
                    OpenAiBackend::plan(),
                ))
            }
            ProviderId::GoogleGemini => {
                let key = required_key(self.config.google_api_key.as_ref(), "Google API key")?;
                Arc::new(FallbackProvider::new(
                    GeminiBackend::new(self.client.clone(), key, &self.config.google_base_url),
                    GeminiBackend::plan(),
                ))
            }
        };
        Ok(provider)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::providers::ImageGenerationProvider;

    fn factory(openai: Option<&str>, google: Option<&str>) -> ProviderFactory {
        ProviderFactory::with_client(
            reqwest::Client::new(),
            ProvidersConfig {
                openai_api_key: openai.map(String::from),
                google_api_key: google.map(String::from),
                ..ProvidersConfig::default()
            },
        )
    }

    #[test]
    fn test_creates_configured_provider() {
        let factory = factory(Some("sk-test"), None);
        let provider = factory.create(ProviderId::OpenAi).unwrap();
        assert_eq!(provider.id(), ProviderId::OpenAi);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let factory = factory(Some("sk-test"), None);
        let err = factory.create(ProviderId::GoogleGemini).err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_blank_key_is_configuration_error() {
        let factory = factory(Some("   "), Some("g-key"));
        assert!(factory.create(ProviderId::OpenAi).is_err());
        assert_eq!(
            factory.create(ProviderId::GoogleGemini).unwrap().id(),
            ProviderId::GoogleGemini
        );
    }

    #[test]
    fn test_default_provider() {
        assert_eq!(factory(None, None).default_provider().unwrap(), ProviderId::OpenAi);
    }
}
