// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template source capabilities.
//!
//! Templates compiled by name are located through two capabilities:
//!
//! - [`FragmentSource`]: synchronous lookup of an inline template by id.
//!   Absence is not an error, it only falls through to fetching.
//! - [`SourceFetcher`]: asynchronous transport returning template text.
//!
//! # Implementations
//!
//! - [`MemorySources`]: both capabilities over in-memory maps (tests, embedding)
//! - [`FileSystemFetcher`]: reads templates below a root directory
//!   (`filesystem` feature)

use crate::error::FetchError;
use futures_util::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(feature = "filesystem")]
use std::path::{Path, PathBuf};

/// Asynchronous transport that fetches template text by name.
///
/// The resolver never calls `fetch` twice for the same name within one
/// compile tree.
pub trait SourceFetcher: Send + Sync {
    /// Fetches the source of `name`.
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// Synchronous lookup of inline template fragments.
pub trait FragmentSource: Send + Sync {
    /// Returns the fragment registered under `id`, if any.
    fn find(&self, id: &str) -> Option<String>;
}

impl<T: SourceFetcher + ?Sized> SourceFetcher for Arc<T> {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        (**self).fetch(name)
    }
}

impl<T: FragmentSource + ?Sized> FragmentSource for Arc<T> {
    fn find(&self, id: &str) -> Option<String> {
        (**self).find(id)
    }
}

#[derive(Default)]
struct Stores {
    templates: HashMap<String, String>,
    fragments: HashMap<String, String>,
    fetches: HashMap<String, usize>,
}

/// In-memory templates and fragments.
///
/// Clones share the same storage, so one clone can be handed to a compiler
/// as its fetcher and another as its fragment source.
#[derive(Clone, Default)]
pub struct MemorySources {
    stores: Arc<Mutex<Stores>>,
}

impl MemorySources {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stores<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Stores) -> R,
    {
        f(&mut self.stores.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Adds a fetchable template.
    pub fn add_template(&self, name: &str, source: &str) {
        self.with_stores(|s| {
            s.templates.insert(name.to_string(), source.to_string());
        });
    }

    /// Adds an inline fragment.
    pub fn add_fragment(&self, id: &str, source: &str) {
        self.with_stores(|s| {
            s.fragments.insert(id.to_string(), source.to_string());
        });
    }

    /// Removes a template and a fragment of that name.
    pub fn remove(&self, name: &str) {
        self.with_stores(|s| {
            s.templates.remove(name);
            s.fragments.remove(name);
        });
    }

    /// How many times `name` has been fetched.
    pub fn fetch_count(&self, name: &str) -> usize {
        self.with_stores(|s| s.fetches.get(name).copied().unwrap_or(0))
    }
}

impl SourceFetcher for MemorySources {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        let result = self.with_stores(|s| {
            *s.fetches.entry(name.to_string()).or_insert(0) += 1;
            s.templates.get(name).cloned().ok_or(FetchError::NotFound)
        });
        future::ready(result).boxed()
    }
}

impl FragmentSource for MemorySources {
    fn find(&self, id: &str) -> Option<String> {
        self.with_stores(|s| s.fragments.get(id).cloned())
    }
}

/// Filesystem-based fetcher.
///
/// Resolves names relative to a root directory, optionally appending an
/// extension. Names that resolve outside the root are refused.
///
/// # Examples
///
/// ```rust,ignore
/// use tagsmith::FileSystemFetcher;
///
/// let fetcher = FileSystemFetcher::new("./templates").with_extension("html");
/// // "partials/nav" reads ./templates/partials/nav.html
/// ```
#[cfg(feature = "filesystem")]
#[derive(Debug, Clone)]
pub struct FileSystemFetcher {
    /// The root directory for template resolution.
    pub root_dir: PathBuf,
    /// Extension appended to names that have none.
    pub extension: Option<String>,
}

#[cfg(feature = "filesystem")]
impl FileSystemFetcher {
    /// Creates a fetcher rooted at `root_dir`.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            extension: None,
        }
    }

    /// Appends `.extension` to names without one.
    pub fn with_extension(mut self, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        self.extension = (!extension.is_empty()).then(|| extension.to_string());
        self
    }

    /// The path `name` resolves to, before the root check.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let mut path = self.root_dir.join(name.trim_start_matches('/'));
        if let Some(extension) = &self.extension {
            if path.extension().is_none() {
                path.set_extension(extension);
            }
        }
        path
    }

    fn read(&self, name: &str) -> Result<String, FetchError> {
        let path = self.path_for(name);
        let canonical_path = std::fs::canonicalize(&path)?;
        let canonical_root = std::fs::canonicalize(&self.root_dir)
            .map_err(|e| FetchError::Status(format!("cannot open root '{}': {}", self.root_dir.display(), e)))?;

        // Security: Verify the resolved path is within root_dir
        if !canonical_path.starts_with(&canonical_root) {
            tracing::warn!("refusing template '{}' outside {}", name, canonical_root.display());
            return Err(FetchError::Status(format!("path '{}' escapes the template root", name)));
        }
        if !canonical_path.is_file() {
            return Err(FetchError::NotFound);
        }

        tracing::debug!("fetching template '{}' from {}", name, canonical_path.display());
        Ok(std::fs::read_to_string(&canonical_path)?)
    }
}

#[cfg(feature = "filesystem")]
impl SourceFetcher for FileSystemFetcher {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        future::ready(self.read(name)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sources() {
        let sources = MemorySources::new();
        sources.add_template("page", "<p>{{= title}}</p>");
        sources.add_fragment("row", "<tr></tr>");

        assert_eq!(sources.fetch("page").await.unwrap(), "<p>{{= title}}</p>");
        assert!(matches!(sources.fetch("row").await, Err(FetchError::NotFound)));
        assert_eq!(sources.find("row").as_deref(), Some("<tr></tr>"));
        assert_eq!(sources.find("page"), None);
        assert_eq!(sources.fetch_count("page"), 1);
        assert_eq!(sources.fetch_count("row"), 1);

        let shared = sources.clone();
        shared.remove("page");
        assert!(sources.fetch("page").await.is_err());
    }

    #[cfg(feature = "filesystem")]
    #[tokio::test]
    async fn test_filesystem_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("templates");
        std::fs::create_dir_all(root.join("partials")).unwrap();
        std::fs::write(root.join("partials/nav.html"), "<nav></nav>").unwrap();
        std::fs::write(dir.path().join("secret.html"), "secret").unwrap();

        let fetcher = FileSystemFetcher::new(&root).with_extension(".html");
        assert_eq!(fetcher.fetch("partials/nav").await.unwrap(), "<nav></nav>");
        assert_eq!(fetcher.fetch("/partials/nav.html").await.unwrap(), "<nav></nav>");
        assert!(matches!(fetcher.fetch("missing").await, Err(FetchError::NotFound)));
        assert!(matches!(fetcher.fetch("partials").await, Err(FetchError::NotFound)));

        match fetcher.fetch("../secret").await {
            Err(FetchError::Status(status)) => assert!(status.contains("escapes")),
            other => panic!("expected refusal, got {:?}", other),
        }
    }
}
