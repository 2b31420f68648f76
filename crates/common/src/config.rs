//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Chat platform configuration.
    pub slack: SlackConfig,
    /// Image provider credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Job queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Budget for answering a webhook, below the platform's 3 second limit.
    #[serde(default = "default_ingress_deadline_ms")]
    pub ingress_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ingress_deadline_ms: default_ingress_deadline_ms(),
        }
    }
}

/// Workspace capability tier, which decides how artifacts are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceTier {
    /// Regular workspaces: artifacts are shared as files with instructions.
    #[default]
    Standard,
    /// Enterprise workspaces: artifacts are installed as emoji directly.
    EnterpriseGrid,
}

/// Chat platform configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Secret used to sign inbound requests.
    pub signing_secret: String,
    /// Bot token for Web API calls.
    pub bot_token: String,
    /// Capability tier of the installed workspace.
    #[serde(default)]
    pub workspace_tier: WorkspaceTier,
    /// Web API base URL.
    #[serde(default = "default_slack_api_base_url")]
    pub api_base_url: String,
    /// Maximum accepted request age in seconds.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
}

/// Image provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when a job does not name one.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// `OpenAI` API key.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Google Generative Language API key.
    #[serde(default)]
    pub google_api_key: Option<String>,
    /// `OpenAI` API base URL.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    /// Google Generative Language API base URL.
    #[serde(default = "default_google_base_url")]
    pub google_base_url: String,
    /// Timeout for a single generation request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            openai_api_key: None,
            google_api_key: None,
            openai_base_url: default_openai_base_url(),
            google_base_url: default_google_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Queue backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Push topic that calls `POST /process` per message.
    #[default]
    Push,
    /// Redis list consumed by an in-process worker.
    Redis,
    /// Process-local queue, for development.
    Memory,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Which backend carries jobs.
    #[serde(default)]
    pub backend: QueueBackend,
    /// Cloud project owning the topics.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Topic jobs are published to.
    #[serde(default)]
    pub topic: Option<String>,
    /// Topic undecodable payloads are moved to.
    #[serde(default)]
    pub dead_letter_topic: Option<String>,
    /// Bearer token for the publish API.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Publish API base URL.
    #[serde(default = "default_publish_base_url")]
    pub publish_base_url: String,
    /// Delivery attempts the transport makes before dead-lettering.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            project_id: None,
            topic: None,
            dead_letter_topic: None,
            auth_token: None,
            publish_base_url: default_publish_base_url(),
            max_delivery_attempts: default_max_delivery_attempts(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            prefix: default_redis_prefix(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Per-job budget; must stay below the queue acknowledgement deadline.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Largest emoji file the chat platform accepts.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_ingress_deadline_ms() -> u64 {
    2500
}

fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

const fn default_replay_window_secs() -> u64 {
    300
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_google_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    120
}

fn default_publish_base_url() -> String {
    "https://pubsub.googleapis.com/v1".to_string()
}

const fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "emojibot".to_string()
}

const fn default_job_timeout_secs() -> u64 {
    540
}

const fn default_max_output_bytes() -> usize {
    128 * 1024
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `EMOJIBOT_ENV`)
    /// 4. Environment variables with `EMOJIBOT__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("EMOJIBOT_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("EMOJIBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("EMOJIBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [slack]
                signing_secret = "s3cr3t"
                bot_token = "xoxb-test"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: Config = raw.try_deserialize().unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.slack.replay_window_secs, 300);
        assert_eq!(config.slack.workspace_tier, WorkspaceTier::Standard);
        assert_eq!(config.providers.default_provider, "openai");
        assert!(config.providers.openai_api_key.is_none());
        assert_eq!(config.queue.backend, QueueBackend::Push);
        assert_eq!(config.queue.max_delivery_attempts, 5);
        assert_eq!(config.worker.max_output_bytes, 131_072);
        assert!(config.worker.job_timeout_secs < 600);
    }

    #[test]
    fn test_enterprise_tier_parses() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [slack]
                signing_secret = "s"
                bot_token = "t"
                workspace_tier = "enterprise_grid"

                [queue]
                backend = "redis"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: Config = raw.try_deserialize().unwrap();
        assert_eq!(config.slack.workspace_tier, WorkspaceTier::EnterpriseGrid);
        assert_eq!(config.queue.backend, QueueBackend::Redis);
    }
}
