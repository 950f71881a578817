//! Error types for release bundle operations.

use std::io;
use std::path::PathBuf;

/// Result type alias for release bundle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, checksumming or extracting bundles.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error during file operations.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The bundle tree could not be walked.
    #[error("failed to walk bundle tree at {path}: {source}")]
    Walk {
        /// Root of the walk.
        path: PathBuf,
        /// Underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// The bundle has no regular files to checksum or extract.
    #[error("release bundle {0:?} contains no files")]
    Empty(String),

    /// A bundle path points outside of the bundle root.
    #[error("invalid bundle file path: {0}")]
    InvalidPath(String),

    /// The registry file could not be parsed.
    #[error("invalid registry file {path}: {message}")]
    InvalidRegistry {
        /// Registry file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A registry declared a bundle directory that does not exist.
    #[error("release bundle {name:?} directory not found: {path}")]
    MissingBundleDir {
        /// Bundle name.
        name: String,
        /// Declared directory.
        path: PathBuf,
    },

    /// Two bundles were registered under the same name.
    #[error("duplicate release bundle name {0:?}")]
    DuplicateBundle(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
