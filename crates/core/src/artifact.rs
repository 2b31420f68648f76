//! Value objects produced by generation and delivery.

use emojibot_common::{AppError, AppResult};
use serde::Serialize;

use crate::job::ProviderId;

/// Provider output before delivery.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    image_bytes: Vec<u8>,
    /// MIME type of the image bytes.
    pub mime_format: String,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
    /// Provider that actually produced the image.
    pub provider: ProviderId,
    /// Model that produced the image.
    pub model: String,
    /// Whether the provider's fallback model was used.
    pub is_fallback: bool,
}

impl std::fmt::Debug for GeneratedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedArtifact")
            .field("bytes", &self.image_bytes.len())
            .field("mime_format", &self.mime_format)
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("is_fallback", &self.is_fallback)
            .finish()
    }
}

impl GeneratedArtifact {
    /// Build an artifact; empty image data is rejected.
    pub fn new(
        image_bytes: Vec<u8>,
        mime_format: impl Into<String>,
        width_px: u32,
        height_px: u32,
        provider: ProviderId,
        model: impl Into<String>,
        is_fallback: bool,
    ) -> AppResult<Self> {
        if image_bytes.is_empty() {
            return Err(AppError::TransientProvider(
                "Provider returned empty image data".to_string(),
            ));
        }
        Ok(Self {
            image_bytes,
            mime_format: mime_format.into(),
            width_px,
            height_px,
            provider,
            model: model.into(),
            is_fallback,
        })
    }

    /// Encoded image.
    #[must_use]
    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    /// Take the encoded image.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.image_bytes
    }

    /// Whether width equals height.
    #[must_use]
    pub const fn is_square(&self) -> bool {
        self.width_px == self.height_px
    }

    /// Replace the image with post-processed bytes, keeping provenance.
    pub fn with_processed(
        &self,
        image_bytes: Vec<u8>,
        mime_format: &str,
        edge_px: u32,
    ) -> AppResult<Self> {
        Self::new(
            image_bytes,
            mime_format,
            edge_px,
            edge_px,
            self.provider,
            self.model.clone(),
            self.is_fallback,
        )
    }

    /// File extension matching the mime type.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self.mime_format.as_str() {
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

/// Delivery path that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Installed straight into the workspace emoji set.
    DirectInstall,
    /// Shared as a file with upload instructions.
    FileShare,
}

/// Result of delivering an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharingOutcome {
    /// Strategy that delivered the artifact.
    pub strategy: StrategyKind,
    /// Whether the image was uploaded.
    pub uploaded: bool,
    /// Follow-up instructions shown to the user, if any.
    pub instructions: Option<String>,
    /// Whether direct install failed and file share took over.
    pub fell_back: bool,
    /// User-visible messages posted for this delivery.
    pub messages_posted: u32,
}
