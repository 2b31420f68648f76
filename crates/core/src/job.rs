//! Emoji generation job, the unit of work carried across the queue.

use chrono::{DateTime, Utc};
use emojibot_common::{AppError, AppResult, IdGenerator};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest emoji name the chat platform accepts.
pub const MAX_EMOJI_NAME_LEN: usize = 100;

/// Upper bound on variants a single job may request.
pub const MAX_VARIANTS: u8 = 4;

static INVALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern
    Regex::new(r"[^a-z0-9_\-]+").unwrap()
});

static REPEATED_UNDERSCORES: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern
    Regex::new(r"_{2,}").unwrap()
});

/// Image generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// `OpenAI` Images API.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini image models.
    GoogleGemini,
}

impl ProviderId {
    /// Wire identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::GoogleGemini => "google_gemini",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "google_gemini" | "gemini" | "google" => Ok(Self::GoogleGemini),
            other => Err(AppError::Validation(format!("Unknown provider: {other}"))),
        }
    }
}

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet picked up.
    #[default]
    Pending,
    /// Held by a worker.
    Processing,
    /// Generated; delivery may still have failed.
    Completed,
    /// Gave up.
    Failed,
}

impl JobStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether the job reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving to `next` keeps the lifecycle forward-only.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

/// Where the shared artifact lands relative to the originating message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPlacement {
    /// Start a new thread in the origin channel.
    #[default]
    NewThread,
    /// Reply inside the thread the request came from.
    ExistingThread,
}

/// Who sees the delivery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Posted to the channel.
    #[default]
    Everyone,
    /// Only the requester, via a direct message.
    RequesterOnly,
}

/// Largest edge the post-processor starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSize {
    /// 512 x 512.
    #[default]
    #[serde(rename = "512")]
    Px512,
    /// 256 x 256.
    #[serde(rename = "256")]
    Px256,
    /// 128 x 128.
    #[serde(rename = "128")]
    Px128,
}

impl ImageSize {
    /// Edge length in pixels.
    #[must_use]
    pub const fn pixels(self) -> u32 {
        match self {
            Self::Px512 => 512,
            Self::Px256 => 256,
            Self::Px128 => 128,
        }
    }
}

impl FromStr for ImageSize {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "512" | "512x512" => Ok(Self::Px512),
            "256" | "256x256" => Ok(Self::Px256),
            "128" | "128x128" => Ok(Self::Px128),
            other => Err(AppError::Validation(format!("Unsupported image size: {other}"))),
        }
    }
}

/// Delivery preferences chosen by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharingPreferences {
    /// New or existing thread.
    #[serde(default)]
    pub placement: ThreadPlacement,
    /// Who sees the result.
    #[serde(default)]
    pub visibility: Visibility,
    /// Output edge length.
    #[serde(default)]
    pub image_size: ImageSize,
}

/// A validated emoji short name (`[a-z0-9_-]{1,100}`).
///
/// Names read off the queue go through [`EmojiName::parse`] as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmojiName(String);

impl TryFrom<String> for EmojiName {
    type Error = AppError;

    fn try_from(raw: String) -> AppResult<Self> {
        Self::parse(&raw)
    }
}

impl From<EmojiName> for String {
    fn from(name: EmojiName) -> Self {
        name.0
    }
}

impl EmojiName {
    /// Normalise user input into an emoji name.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let lowered = raw.trim().trim_matches(':').to_lowercase().replace(' ', "_");
        let replaced = INVALID_NAME_CHARS.replace_all(&lowered, "_");
        let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
        let mut name = collapsed.trim_matches('_').to_string();
        name.truncate(MAX_EMOJI_NAME_LEN);
        let name = name.trim_end_matches('_').to_string();

        if name.is_empty() {
            return Err(AppError::Validation(format!(
                "Emoji name {raw:?} has no usable characters"
            )));
        }
        Ok(Self(name))
    }

    /// Derive a name from the first few words of a description.
    pub fn from_description(description: &str) -> AppResult<Self> {
        let words: Vec<&str> = description.split_whitespace().take(4).collect();
        Self::parse(&words.join("_"))
    }

    /// This name followed by `_{n}`, shortening the base so the suffix
    /// always survives the length limit.
    #[must_use]
    pub fn numbered(&self, n: usize) -> Self {
        let suffix = format!("_{n}");
        let keep = MAX_EMOJI_NAME_LEN.saturating_sub(suffix.len()).min(self.0.len());
        let base = self.0[..keep].trim_end_matches('_');
        Self(format!("{base}{suffix}"))
    }

    /// The name without surrounding colons.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmojiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const fn default_variant_count() -> u8 {
    1
}

/// One user-requested unit of image-generation work.
///
/// Serialized as the queue message body. Optional fields fall back to
/// defaults on decode so payloads from older producers stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiGenerationJob {
    job_id: String,
    trace_id: String,
    /// Free-text description.
    pub description: String,
    /// Short name of the first variant.
    pub emoji_name: EmojiName,
    /// User who asked.
    pub requester_id: String,
    /// Channel or conversation the request came from.
    pub origin_id: String,
    /// Provider to generate with.
    #[serde(default)]
    pub provider: ProviderId,
    /// Placement, visibility and size.
    #[serde(default)]
    pub sharing_preferences: SharingPreferences,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    retry_count: u32,
    created_at: DateTime<Utc>,
    /// Thread the request was made in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Text of the message the request was attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    /// How many images to generate.
    #[serde(default = "default_variant_count")]
    pub variant_count: u8,
}

/// Parameters supplied by the interaction layer for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Free-text description.
    pub description: String,
    /// Short name of the first variant.
    pub emoji_name: EmojiName,
    /// User who asked.
    pub requester_id: String,
    /// Channel the request came from.
    pub origin_id: String,
    /// Provider to generate with.
    pub provider: ProviderId,
    /// Placement, visibility and size.
    pub sharing_preferences: SharingPreferences,
    /// Thread the request was made in.
    pub thread_ts: Option<String>,
    /// Text of the message the request was attached to.
    pub context_text: Option<String>,
    /// How many images to generate.
    pub variant_count: u8,
}

impl EmojiGenerationJob {
    /// Create a pending job with fresh job and trace ids.
    #[must_use]
    pub fn create(ids: &IdGenerator, params: NewJob) -> Self {
        Self {
            job_id: ids.job_id(),
            trace_id: ids.trace_id(),
            description: params.description,
            emoji_name: params.emoji_name,
            requester_id: params.requester_id,
            origin_id: params.origin_id,
            provider: params.provider,
            sharing_preferences: params.sharing_preferences,
            status: JobStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            thread_ts: params.thread_ts,
            context_text: params.context_text,
            variant_count: params.variant_count.clamp(1, MAX_VARIANTS),
        }
    }

    /// Unique, immutable job id.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Correlation id carried into every log line.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Deliveries seen beyond the first.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the job was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of variants to generate, clamped to the supported range.
    #[must_use]
    pub fn variants(&self) -> usize {
        usize::from(self.variant_count.clamp(1, MAX_VARIANTS))
    }

    fn transition(&mut self, next: JobStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "Illegal job transition {:?} -> {next:?} for {}",
                self.status, self.job_id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Move to [`JobStatus::Processing`].
    pub fn mark_processing(&mut self) -> AppResult<()> {
        self.transition(JobStatus::Processing)
    }

    /// Move to [`JobStatus::Completed`].
    pub fn mark_completed(&mut self) -> AppResult<()> {
        self.transition(JobStatus::Completed)
    }

    /// Move to [`JobStatus::Failed`].
    pub fn mark_failed(&mut self) -> AppResult<()> {
        self.transition(JobStatus::Failed)
    }

    /// Record the transport's delivery attempt (1-based).
    ///
    /// The retry count only ever grows.
    pub fn record_delivery_attempt(&mut self, attempt: u32) {
        self.retry_count = self.retry_count.max(attempt.saturating_sub(1));
    }

    /// Prompt sent to the image provider.
    #[must_use]
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "Create a single emoji-style icon of: {}. \
             One centered subject, transparent background, bold clean outlines, \
             flat vivid colors, no text, readable at 32x32 pixels.",
            self.description.trim()
        );
        if let Some(context) = self.context_text.as_deref().map(str::trim)
            && !context.is_empty()
        {
            prompt.push_str(&format!(" It will be used as a reaction to the message: \"{context}\"."));
        }
        prompt
    }

    /// Serialize for the queue transport.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AppError::Internal(format!("Failed to serialize job: {e}")))
    }

    /// Decode a queue payload.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::CorruptedJobData(format!("Invalid job payload: {e}")))
    }
}
