//! Continuous watch mode.
//!
//! Subscribes to every source folder and load source document of a
//! [`Pipeline`](spirea_engine::Pipeline) and reconciles filesystem events
//! against the cache as they arrive. Callers typically run
//! [`Pipeline::build`](spirea_engine::Pipeline::build) first so the
//! session starts from a consistent cache, then hand the pipeline to
//! [`watch_blocking`] (or [`watch`] inside an existing runtime).

pub mod error;
pub mod runtime;

pub use error::WatchError;
pub use runtime::{watch, watch_blocking, DEBOUNCE_WINDOW};
