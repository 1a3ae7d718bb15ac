//! Spirea core library — descriptors, registration context, JSON helpers,
//! errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, `SourceKind`, records and cache entries
//! - [`error`] — [`CoreError`]
//! - [`json`] — document read / atomic write
//! - [`source`] — content source descriptors
//! - [`load`] — derived load descriptors
//! - [`context`] — [`Registrar`]

pub mod context;
pub mod error;
pub mod json;
pub mod load;
pub mod source;
pub mod types;

pub use context::Registrar;
pub use error::CoreError;
pub use load::{LoadHandle, LoadOptions};
pub use source::{normalize_path, CallbackError, SourceOptions, SourceSpec};
pub use types::{CacheEntry, LoadName, ParseOutcome, Record, Signature, SourceKind};
