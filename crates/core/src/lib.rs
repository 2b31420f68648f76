//! Domain model and services for emojibot.
//!
//! - [`job`]: the queued unit of work and its lifecycle
//! - [`artifact`]: generated images and delivery outcomes
//! - [`services`]: providers, post-processing, chat platform and sharing

pub mod artifact;
pub mod job;
pub mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use artifact::{GeneratedArtifact, SharingOutcome, StrategyKind};
pub use job::{
    EmojiGenerationJob, EmojiName, ImageSize, JobStatus, NewJob, ProviderId, SharingPreferences,
    ThreadPlacement, Visibility,
};
pub use services::*;
