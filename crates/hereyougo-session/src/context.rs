//! Per-request state: model registry and cache.

use crate::cache::Cache;
use hereyougo_core::Models;

/// Everything a unit of work remembers between operations.
///
/// Nothing here is global; two contexts never share instances.
#[derive(Debug, Default)]
pub struct Context {
    pub models: Models,
    pub cache: Cache,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: Models) -> Self {
        Self {
            models,
            cache: Cache::new(),
        }
    }

    /// Forget cached entities, relations and collections.
    ///
    /// Models survive: they only depend on declarations and hooks.
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}
