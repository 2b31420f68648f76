//! Services used by the ingress and the worker.

#![allow(missing_docs)]

pub mod media;
pub mod providers;
pub mod queue;
pub mod sharing;
pub mod slack;

pub use media::{ImagePostProcessor, ProcessedImage, decoded_dimensions};
pub use providers::{
    FallbackProvider, ImageGenerationProvider, ImageProvider, ImageProviderFactory, ModelBackend,
    ModelError, ModelPlan, ProviderFactory, RawImage,
};
pub use queue::{
    Acknowledgement, DeadLetterService, DeadLetterSink, DuplicateGuard, DuplicateGuardService,
    JobQueue, JobQueueService, LoggingDeadLetterSink,
};
pub use sharing::{
    DirectInstallStrategy, FileShareStrategy, SharingStrategy, SharingStrategyService,
    strategy_for_tier,
};
pub use slack::{ChatPlatform, ChatPlatformService, FileUpload, SlackClient, notify_requester};
