// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compilation cache.
//!
//! Maps a template's logical name to its [`Renderer`]. A name maps to at most
//! one renderer at a time; storing under an existing name replaces it.
//!
//! # Cache Implementations
//!
//! - [`MemoryCache`]: in-memory map shared between clones
//! - [`NoOpCache`]: never stores anything, every compile is fresh
//!
//! Implement [`RendererCache`] for other strategies.

use crate::renderer::Renderer;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Trait for renderer caches.
pub trait RendererCache: Send + Sync + fmt::Debug {
    /// Retrieves the renderer stored under `name`.
    fn get(&self, name: &str) -> Option<Renderer>;
    /// Stores `renderer` under `name`, replacing any previous entry.
    fn set(&self, name: &str, renderer: Renderer);
    /// Removes `name`. Returns `true` if it was cached.
    fn remove(&self, name: &str) -> bool;
    /// Removes every entry.
    fn clear(&self);
    /// Checks if `name` is cached.
    fn contains_key(&self, name: &str) -> bool;
    /// Cached names, sorted.
    fn names(&self) -> Vec<String>;
}

/// In-memory cache.
///
/// Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Renderer>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Renderer>> {
        // A panic while holding the lock cannot leave a half-written map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("names", &self.names())
            .finish()
    }
}

impl RendererCache for MemoryCache {
    fn get(&self, name: &str) -> Option<Renderer> {
        self.lock().get(name).cloned()
    }

    fn set(&self, name: &str, renderer: Renderer) {
        self.lock().insert(name.to_string(), renderer);
    }

    fn remove(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn contains_key(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Cache that never stores or retrieves anything.
///
/// Named compiles always recompile; includes only resolve while a
/// resolution is in progress.
#[derive(Debug, Clone, Default)]
pub struct NoOpCache;

impl NoOpCache {
    /// Creates a new no-op cache.
    pub fn new() -> Self {
        Self
    }
}

impl RendererCache for NoOpCache {
    fn get(&self, _name: &str) -> Option<Renderer> {
        None
    }

    fn set(&self, _name: &str, _renderer: Renderer) {}

    fn remove(&self, _name: &str) -> bool {
        false
    }

    fn clear(&self) {}

    fn contains_key(&self, _name: &str) -> bool {
        false
    }

    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache_replaces_by_name() {
        let cache = MemoryCache::new();
        assert!(!cache.contains_key("page"));

        cache.set("page", Renderer::noop());
        cache.set("nav", Renderer::noop());
        cache.set("page", Renderer::noop());
        assert_eq!(cache.names(), vec!["nav".to_string(), "page".to_string()]);

        let shared = cache.clone();
        assert!(shared.remove("page"));
        assert!(!cache.contains_key("page"));
        assert!(cache.get("nav").is_some());

        cache.clear();
        assert!(shared.names().is_empty());
    }

    #[test]
    fn test_noop_cache_stores_nothing() {
        let cache = NoOpCache::new();
        cache.set("page", Renderer::noop());
        assert!(cache.get("page").is_none());
        assert!(!cache.remove("page"));
    }
}
