//! # spirea-engine
//!
//! Cache store, parse/add/unlink state machine, and the build pipeline.
//!
//! Create a [`Pipeline`] with its setup closure, then call
//! [`Pipeline::build`] for a one-shot pass, or hand it to `spirea-watch`
//! for continuous reconciliation.

pub mod cache;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod scan;

pub use cache::{BuildMode, CacheStore};
pub use error::EngineError;
pub use pipeline::{BuildSummary, Pipeline, SourceEvent};
pub use process::ProcessOutcome;
