//! Source lookup by key.
//!
//! A [`SourcePack`](crate::SourcePack) consults its registry only for forced
//! keys, the sources every pack loads even when they are not members.

use std::sync::Arc;

use dashmap::DashMap;

use crate::source::Source;

/// Key of the user's favourites source.
pub const FAVORITES_KEY: &str = "favorites";

/// Key of the recently used source.
pub const RECENT_KEY: &str = "recent";

/// Keys every pack ensures are loaded unless configured otherwise.
pub const DEFAULT_FORCED_KEYS: &[&str] = &[FAVORITES_KEY, RECENT_KEY];

/// Resolves named sources.
pub trait SourceRegistry: Send + Sync + std::fmt::Debug {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Source>>;
}

/// Registry that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRegistry;

impl SourceRegistry for EmptyRegistry {
    fn resolve(&self, _key: &str) -> Option<Arc<dyn Source>> {
        None
    }
}

/// Concurrent map of registered sources.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    sources: DashMap<String, Arc<dyn Source>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under its own key, returning the source it replaced.
    pub fn register(&self, source: Arc<dyn Source>) -> Option<Arc<dyn Source>> {
        let key = source.key().to_string();
        tracing::debug!(source_key = %key, "Registered source");
        self.sources.insert(key, source)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn Source>> {
        self.sources.remove(key).map(|(_, source)| source)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sources
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceRegistry for InMemoryRegistry {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(key).map(|entry| entry.value().clone())
    }
}
