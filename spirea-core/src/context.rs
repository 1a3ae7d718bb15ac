//! Registration context.
//!
//! Descriptors are registered synchronously inside a setup closure against
//! an explicit `Registrar` handle — there is no process-wide "current
//! context" pointer to set and clear. After the closure returns, the
//! collected descriptors are frozen: sources sorted ascending by kind
//! (stable for equal kinds), loads kept in registration order.

use crate::error::CoreError;
use crate::load::{LoadHandle, LoadOptions};
use crate::source::{SourceOptions, SourceSpec};
use crate::types::{LoadName, SourceKind};

/// Collects source and load registrations during pipeline setup.
#[derive(Debug, Default)]
pub struct Registrar {
    sources: Vec<SourceSpec>,
    loads: Vec<LoadHandle>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a content source. Misconfiguration fails here, before any
    /// build or watch starts.
    pub fn source(&mut self, kind: SourceKind, options: SourceOptions) -> Result<(), CoreError> {
        let spec = SourceSpec::resolve(kind, options)?;
        tracing::debug!(kind = %spec.kind, base = %spec.base.display(), "registered source");
        self.sources.push(spec);
        Ok(())
    }

    /// Register a derived load and hand back the shared handle that source
    /// callbacks capture.
    pub fn load(
        &mut self,
        name: impl Into<LoadName>,
        options: LoadOptions,
    ) -> Result<LoadHandle, CoreError> {
        let handle = LoadHandle::resolve(name.into(), options)?;
        tracing::debug!(load = %handle.name(), "registered load");
        self.loads.push(handle.clone());
        Ok(handle)
    }

    /// Freeze registrations: sources sorted by kind, loads in registration
    /// order.
    pub fn finish(mut self) -> (Vec<SourceSpec>, Vec<LoadHandle>) {
        self.sources.sort_by_key(|s| s.kind);
        (self.sources, self.loads)
    }
}
