//! The served root and entry document, fixed once at startup.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Where files are served from and which HTML file receives the reload script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    root: PathBuf,
    entry: String,
}

impl Site {
    /// Resolve a user-supplied entry path, absolute or relative to the
    /// current directory, into its parent directory and file name.
    pub fn from_entry(entry: &Path) -> Result<Self> {
        let absolute = std::path::absolute(entry).map_err(|source| Error::EntryPath {
            path: entry.to_path_buf(),
            source,
        })?;

        // Best effort: follow symlinks when the file exists so the watcher
        // sees the real directory.
        let absolute = absolute.canonicalize().unwrap_or(absolute);

        if absolute.is_dir() {
            return Err(Error::NotAFile(absolute));
        }

        let root = absolute.parent().map(Path::to_path_buf);
        let name = absolute.file_name().and_then(|n| n.to_str()).map(str::to_owned);

        match (root, name) {
            (Some(root), Some(entry)) => Ok(Self::new(root, entry)),
            _ => Err(Error::NotAFile(absolute)),
        }
    }

    /// Build a site from parts that are already resolved.
    pub fn new(root: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self { root: root.into(), entry: entry.into() }
    }

    /// Absolute directory being served and watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name (not path) of the entry document.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Absolute path of the entry document.
    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.entry)
    }
}
