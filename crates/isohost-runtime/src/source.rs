//! Script source loading.
//!
//! Loading is a collaborator of the registry: it only needs text back for a
//! location string. Implementations are passed in as `Arc<dyn SourceLoader>`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Trait for fetching script source text.
#[async_trait::async_trait]
pub trait SourceLoader: Send + Sync + 'static {
    /// Load the script at `location`.
    async fn load(&self, location: &str) -> io::Result<String>;

    /// Path used in diagnostics for `location`.
    fn describe(&self, location: &str) -> PathBuf {
        PathBuf::from(location)
    }
}

/// Reads scripts from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsSourceLoader {
    root: Option<PathBuf>,
}

impl FsSourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locations against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl SourceLoader for FsSourceLoader {
    async fn load(&self, location: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.resolve(location)).await
    }

    fn describe(&self, location: &str) -> PathBuf {
        self.resolve(location)
    }
}

/// In-process script table keyed by location.
#[derive(Debug, Default)]
pub struct InMemorySources {
    scripts: RwLock<HashMap<String, String>>,
}

impl InMemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a script.
    pub fn insert(&self, location: impl Into<String>, code: impl Into<String>) {
        self.scripts.write().insert(location.into(), code.into());
    }

    pub fn with_script(self, location: impl Into<String>, code: impl Into<String>) -> Self {
        self.insert(location, code);
        self
    }
}

#[async_trait::async_trait]
impl SourceLoader for InMemorySources {
    async fn load(&self, location: &str) -> io::Result<String> {
        self.scripts.read().get(location).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no script registered at {location}"))
        })
    }
}
