//! Delivery of generated emoji to the workspace.
//!
//! Enterprise workspaces let the bot install emoji directly. Everywhere else
//! the image is shared as a file with instructions for adding it by hand.
//! Each delivery posts exactly one user-visible message.

use async_trait::async_trait;
use emojibot_common::{AppError, AppResult, WorkspaceTier};
use std::sync::Arc;
use tracing::{info, warn};

use crate::artifact::{GeneratedArtifact, SharingOutcome, StrategyKind};
use crate::job::{EmojiGenerationJob, EmojiName, ThreadPlacement, Visibility};
use crate::services::slack::{ChatPlatformService, FileUpload};

/// A way of getting an artifact in front of the requester.
#[async_trait]
pub trait SharingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Deliver `artifact` for `job` under `name`.
    async fn share(
        &self,
        job: &EmojiGenerationJob,
        name: &EmojiName,
        artifact: &GeneratedArtifact,
    ) -> AppResult<SharingOutcome>;
}

/// Shared strategy handle.
pub type SharingStrategyService = Arc<dyn SharingStrategy>;

/// Pick the strategy for a workspace tier.
#[must_use]
pub fn strategy_for_tier(tier: WorkspaceTier, platform: ChatPlatformService) -> SharingStrategyService {
    match tier {
        WorkspaceTier::EnterpriseGrid => Arc::new(DirectInstallStrategy::new(platform)),
        WorkspaceTier::Standard => Arc::new(FileShareStrategy::new(platform)),
    }
}

/// Text shown with a shared file.
#[must_use]
pub fn upload_instructions(name: &EmojiName) -> String {
    format!(
        "Here is your new emoji `:{name}:`. To add it to the workspace, download the image, \
         open *Customize workspace* > *Emoji* > *Add custom emoji*, upload it and name it `{name}`."
    )
}

fn filename_for(name: &EmojiName, artifact: &GeneratedArtifact) -> String {
    format!("{name}.{}", artifact.extension())
}

/// Shares the image as a file with upload instructions.
#[derive(Clone)]
pub struct FileShareStrategy {
    platform: ChatPlatformService,
}

impl FileShareStrategy {
    /// File share through `platform`.
    #[must_use]
    pub fn new(platform: ChatPlatformService) -> Self {
        Self { platform }
    }

    /// Share the file, optionally without posting an announcement.
    ///
    /// With `skip_announcement_message` the caller has already told the
    /// user about the delivery, so the file goes up without a comment.
    pub async fn share_file(
        &self,
        job: &EmojiGenerationJob,
        name: &EmojiName,
        artifact: &GeneratedArtifact,
        skip_announcement_message: bool,
    ) -> AppResult<SharingOutcome> {
        let instructions = upload_instructions(name);
        let filename = filename_for(name, artifact);
        let comment = (!skip_announcement_message).then_some(instructions.as_str());
        let prefs = job.sharing_preferences;

        let upload = FileUpload {
            channel: &job.origin_id,
            thread_ts: None,
            initial_comment: comment,
            filename: &filename,
            title: name.as_str(),
            bytes: artifact.image_bytes(),
        };

        let messages_posted = match (prefs.visibility, prefs.placement, job.thread_ts.as_deref()) {
            (Visibility::RequesterOnly, _, _) => {
                let dm = self.platform.open_direct_channel(&job.requester_id).await?;
                self.platform
                    .upload_file(FileUpload {
                        channel: &dm,
                        ..upload
                    })
                    .await?;
                u32::from(comment.is_some())
            }
            (Visibility::Everyone, ThreadPlacement::ExistingThread, Some(thread_ts)) => {
                self.platform
                    .upload_file(FileUpload {
                        thread_ts: Some(thread_ts),
                        ..upload
                    })
                    .await?;
                u32::from(comment.is_some())
            }
            _ if skip_announcement_message => {
                self.platform.upload_file(upload).await?;
                0
            }
            _ => {
                // New thread: the announcement becomes the thread root and
                // the file goes underneath it without a second message.
                let root_ts = self
                    .platform
                    .post_message(&job.origin_id, None, &instructions)
                    .await?;
                self.platform
                    .upload_file(FileUpload {
                        thread_ts: Some(&root_ts),
                        initial_comment: None,
                        ..upload
                    })
                    .await?;
                1
            }
        };

        Ok(SharingOutcome {
            strategy: StrategyKind::FileShare,
            uploaded: true,
            instructions: Some(instructions),
            fell_back: false,
            messages_posted,
        })
    }
}

#[async_trait]
impl SharingStrategy for FileShareStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileShare
    }

    async fn share(
        &self,
        job: &EmojiGenerationJob,
        name: &EmojiName,
        artifact: &GeneratedArtifact,
    ) -> AppResult<SharingOutcome> {
        self.share_file(job, name, artifact, false)
            .await
            .map_err(|e| AppError::SharingFailed(format!("File share failed: {e}")))
    }
}

/// Installs the emoji straight into the workspace, falling back to file share.
#[derive(Clone)]
pub struct DirectInstallStrategy {
    platform: ChatPlatformService,
    file_share: FileShareStrategy,
}

impl DirectInstallStrategy {
    /// Direct install through `platform`.
    #[must_use]
    pub fn new(platform: ChatPlatformService) -> Self {
        Self {
            file_share: FileShareStrategy::new(platform.clone()),
            platform,
        }
    }

    /// Tell the requester the emoji is ready. Returns whether a message was posted.
    async fn announce_install(&self, job: &EmojiGenerationJob, name: &EmojiName) -> bool {
        let text = format!("Added `:{name}:` to the workspace :{name}:");
        let prefs = job.sharing_preferences;

        let result = match (prefs.visibility, prefs.placement) {
            (Visibility::RequesterOnly, _) => {
                self.platform
                    .post_ephemeral(&job.origin_id, &job.requester_id, &text)
                    .await
            }
            (Visibility::Everyone, ThreadPlacement::ExistingThread) => self
                .platform
                .post_message(&job.origin_id, job.thread_ts.as_deref(), &text)
                .await
                .map(|_| ()),
            (Visibility::Everyone, ThreadPlacement::NewThread) => self
                .platform
                .post_message(&job.origin_id, None, &text)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                // The emoji is installed either way.
                warn!(job_id = %job.job_id(), error = %e, "Failed to announce installed emoji");
                false
            }
        }
    }
}

#[async_trait]
impl SharingStrategy for DirectInstallStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectInstall
    }

    async fn share(
        &self,
        job: &EmojiGenerationJob,
        name: &EmojiName,
        artifact: &GeneratedArtifact,
    ) -> AppResult<SharingOutcome> {
        match self.platform.add_emoji(name.as_str(), artifact.image_bytes()).await {
            Ok(()) => {
                info!(job_id = %job.job_id(), emoji = %name, "Emoji installed");
                let announced = self.announce_install(job, name).await;
                Ok(SharingOutcome {
                    strategy: StrategyKind::DirectInstall,
                    uploaded: true,
                    instructions: None,
                    fell_back: false,
                    messages_posted: u32::from(announced),
                })
            }
            Err(install_err) => {
                warn!(
                    job_id = %job.job_id(),
                    emoji = %name,
                    error = %install_err,
                    "Direct install failed, falling back to file share"
                );
                match self.file_share.share_file(job, name, artifact, false).await {
                    Ok(outcome) => Ok(SharingOutcome {
                        fell_back: true,
                        ..outcome
                    }),
                    Err(share_err) => Err(AppError::SharingFailed(format!(
                        "Direct install failed ({install_err}); file share failed ({share_err})"
                    ))),
                }
            }
        }
    }
}
