//! Test doubles for the chat platform and image providers.
//!
//! Enabled for this crate's unit tests and, through the `test-utils`
//! feature, for integration tests in downstream crates.

use async_trait::async_trait;
use emojibot_common::{AppError, AppResult};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::artifact::GeneratedArtifact;
use crate::job::ProviderId;
use crate::services::providers::{ImageGenerationProvider, ImageProvider, ImageProviderFactory};
use crate::services::slack::{ChatPlatform, FileUpload};

/// A 64x48 RGBA PNG with a soft gradient.
#[must_use]
pub fn sample_png() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(64, 48, |x, y| image::Rgba([(x * 4) as u8, (y * 5) as u8, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    // Encoding an in-memory buffer cannot fail
    let _ = image::DynamicImage::ImageRgba8(img).write_to(&mut out, image::ImageFormat::Png);
    out.into_inner()
}

/// An artifact wrapping [`sample_png`].
#[must_use]
pub fn sample_artifact() -> GeneratedArtifact {
    artifact_for(ProviderId::OpenAi, false)
}

fn artifact_for(provider: ProviderId, is_fallback: bool) -> GeneratedArtifact {
    GeneratedArtifact::new(sample_png(), "image/png", 64, 48, provider, "test-model", is_fallback)
        .unwrap_or_else(|_| unreachable!("sample image is never empty"))
}

/// One call made against [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    /// `chat.postMessage`.
    PostMessage {
        channel: String,
        thread_ts: Option<String>,
        text: String,
        ts: String,
    },
    /// `chat.postEphemeral`.
    PostEphemeral {
        channel: String,
        user: String,
        text: String,
    },
    /// `conversations.open`.
    OpenDirectChannel {
        user: String,
    },
    /// File upload.
    UploadFile {
        channel: String,
        thread_ts: Option<String>,
        initial_comment: Option<String>,
        filename: String,
    },
    /// `emoji.add`.
    AddEmoji {
        name: String,
    },
}

/// Chat platform that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    fail_add_emoji: AtomicBool,
    fail_uploads: AtomicBool,
    fail_messages: AtomicBool,
    fail_ephemeral: AtomicBool,
}

impl RecordingPlatform {
    /// Platform where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `emoji.add` fail.
    #[must_use]
    pub fn failing_add_emoji(self) -> Self {
        self.fail_add_emoji.store(true, Ordering::SeqCst);
        self
    }

    /// Make file uploads fail.
    #[must_use]
    pub fn failing_uploads(self) -> Self {
        self.fail_uploads.store(true, Ordering::SeqCst);
        self
    }

    /// Make `chat.postMessage` fail.
    #[must_use]
    pub fn failing_messages(self) -> Self {
        self.fail_messages.store(true, Ordering::SeqCst);
        self
    }

    /// Make `chat.postEphemeral` fail.
    #[must_use]
    pub fn failing_ephemeral(self) -> Self {
        self.fail_ephemeral.store(true, Ordering::SeqCst);
        self
    }

    /// Snapshot of recorded calls.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Messages a user would see: posts, ephemerals and files carrying a comment.
    pub fn user_visible_messages(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| match call {
                PlatformCall::PostMessage { .. } | PlatformCall::PostEphemeral { .. } => true,
                PlatformCall::UploadFile { initial_comment, .. } => initial_comment.is_some(),
                _ => false,
            })
            .count()
    }

    /// Ephemeral messages sent to `user`.
    pub fn ephemerals_for(&self, user: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::PostEphemeral { user: u, text, .. } if u == user => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn check(flag: &AtomicBool, method: &str) -> AppResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(AppError::ExternalService(format!("{method} failed: scripted")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> AppResult<String> {
        Self::check(&self.fail_messages, "chat.postMessage")?;
        let ts = format!("1700000000.{:06}", self.calls().len() + 1);
        self.record(PlatformCall::PostMessage {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(String::from),
            text: text.to_string(),
            ts: ts.clone(),
        });
        Ok(ts)
    }

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> AppResult<()> {
        Self::check(&self.fail_ephemeral, "chat.postEphemeral")?;
        self.record(PlatformCall::PostEphemeral {
            channel: channel.to_string(),
            user: user.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn open_direct_channel(&self, user: &str) -> AppResult<String> {
        self.record(PlatformCall::OpenDirectChannel { user: user.to_string() });
        Ok(format!("D-{user}"))
    }

    async fn upload_file(&self, upload: FileUpload<'_>) -> AppResult<()> {
        Self::check(&self.fail_uploads, "files.completeUploadExternal")?;
        self.record(PlatformCall::UploadFile {
            channel: upload.channel.to_string(),
            thread_ts: upload.thread_ts.map(String::from),
            initial_comment: upload.initial_comment.map(String::from),
            filename: upload.filename.to_string(),
        });
        Ok(())
    }

    async fn add_emoji(&self, name: &str, _image: &[u8]) -> AppResult<()> {
        Self::check(&self.fail_add_emoji, "emoji.add")?;
        self.record(PlatformCall::AddEmoji { name: name.to_string() });
        Ok(())
    }
}

/// How a [`StubProvider`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Return this many images.
    Succeed(usize),
    /// Return an image marked as produced by the fallback model.
    SucceedWithFallback,
    /// Return a good image followed by one whose body is cut short.
    SucceedThenTruncated,
    /// Fail with a rate limit.
    RateLimited,
    /// Fail with a transient error.
    Transient,
    /// Never answer.
    Hang,
}

/// Provider with fixed behaviour that counts its calls.
#[derive(Debug)]
pub struct StubProvider {
    id: ProviderId,
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubProvider {
    /// Stub answering as `id`.
    #[must_use]
    pub const fn new(id: ProviderId, behavior: StubBehavior) -> Self {
        Self {
            id,
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of generation calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerationProvider for StubProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn generate_variants(&self, _prompt: &str, count: usize) -> AppResult<Vec<GeneratedArtifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StubBehavior::Succeed(n) => Ok((0..n.min(count.max(1))).map(|_| artifact_for(self.id, false)).collect()),
            StubBehavior::SucceedWithFallback => Ok(vec![artifact_for(self.id, true)]),
            StubBehavior::SucceedThenTruncated => {
                let mut bytes = sample_png();
                bytes.truncate(60);
                let truncated = GeneratedArtifact::new(bytes, "image/png", 64, 48, self.id, "test-model", false)?;
                Ok(vec![artifact_for(self.id, false), truncated])
            }
            StubBehavior::RateLimited => Err(AppError::RateLimitExceeded("quota exhausted".to_string())),
            StubBehavior::Transient => Err(AppError::TransientProvider("upstream 503".to_string())),
            StubBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }
}

/// Factory handing out stub providers; ids without a stub are unconfigured.
#[derive(Debug, Default)]
pub struct StubProviderFactory {
    providers: Vec<Arc<StubProvider>>,
    requested: Mutex<Vec<ProviderId>>,
}

impl StubProviderFactory {
    /// Factory with no providers configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stub and return a handle for inspecting it.
    pub fn with(mut self, provider: StubProvider) -> (Self, Arc<StubProvider>) {
        let provider = Arc::new(provider);
        self.providers.push(provider.clone());
        (self, provider)
    }

    /// Ids the worker asked for, in order.
    pub fn requested(&self) -> Vec<ProviderId> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ImageProviderFactory for StubProviderFactory {
    fn create(&self, id: ProviderId) -> AppResult<ImageProvider> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner).push(id);
        self.providers
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.clone() as ImageProvider)
            .ok_or_else(|| AppError::Configuration(format!("No credentials for {id}")))
    }
}
