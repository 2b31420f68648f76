//! Common utilities and shared types for emojibot.
//!
//! This crate provides foundational components used across all emojibot crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: job and trace identifiers via [`IdGenerator`]
//! - **Signatures**: inbound webhook verification via [`SignatureValidator`]
//!
//! # Example
//!
//! ```no_run
//! use emojibot_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("Next job: {} on port {}", id_gen.job_id(), config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod signature;

pub use config::{Config, QueueBackend, WorkspaceTier};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use signature::{SignatureRejection, SignatureValidator, compute_signature};
