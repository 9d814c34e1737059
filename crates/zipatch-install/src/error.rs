//! Error types for patch installation

use std::path::PathBuf;

use thiserror::Error;

/// Result type for install operations
pub type Result<T> = std::result::Result<T, Error>;

/// Installation error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Patch container error
    #[error("Patch format error: {0}")]
    Format(#[from] zipatch_formats::Error),

    /// IO error against a specific install file
    #[error("Failed operating on {path}: {source}")]
    Target {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Part references a patch file the repair session has no reader for
    #[error("No source reader for patch file index {index}")]
    MissingSource { index: u16 },

    /// Index contains a part that can neither be checked nor rebuilt
    #[error("Unverifiable part in {path} at offset {offset:#x}; index was not sealed")]
    UnverifiablePart { path: String, offset: u64 },

    /// Operation was cancelled from another thread
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// True for I/O errors caused by a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(e) | Self::Target { source: e, .. } => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
