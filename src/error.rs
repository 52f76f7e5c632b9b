//! Error types for the live server.
//!
//! Only startup failures surface as [`Error`]. Per-request and per-client
//! failures are handled where they happen and never reach this type.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors raised while bringing the server up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The entry argument could not be turned into an absolute path.
    #[error("cannot resolve entry path {path}: {source}")]
    EntryPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry path does not point at a regular file.
    #[error("entry {0} is not a file")]
    NotAFile(PathBuf),

    /// The filesystem watcher could not be created or attached.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A config file could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid TOML for [`crate::config::Config`].
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    /// A config value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// An embedded asset is missing from the binary.
    #[error("missing embedded asset: {0}")]
    MissingAsset(&'static str),

    /// Failed to bind the listening socket.
    #[error("bind error: {0}")]
    Bind(String),

    /// The HTTP server stopped with an I/O error.
    #[error("serve error: {0}")]
    Serve(String),
}
