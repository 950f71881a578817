//! Error types for reconciliation.
//!
//! Errors are categorized so callers can tell transient failures from
//! configuration mistakes and write conflicts.

use crate::store::StoreError;
use deployer::ObjectKey;
use std::fmt;

/// Result type alias for reconcile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of reconcile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// External tool or IO failure; a later attempt may succeed.
    Transient,
    /// The object asks for something that does not exist; needs a spec change.
    Configuration,
    /// Concurrent modification; re-fetch and retry.
    Conflict,
}

impl ErrorCategory {
    /// Whether retrying without any change can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration)
    }

    /// Human-readable label used in logs
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient failure",
            Self::Configuration => "Configuration error",
            Self::Conflict => "Write conflict",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while reconciling one object.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading or writing the object store failed.
    #[error("failed to {op} {key}: {source}")]
    Store {
        /// Store operation.
        op: &'static str,
        /// Object being reconciled.
        key: ObjectKey,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The object names a release bundle that is not registered.
    #[error("{key}: unrecognized release bundle {bundle:?}")]
    UnknownBundle {
        /// Object being reconciled.
        key: ObjectKey,
        /// Requested bundle name.
        bundle: String,
    },

    /// The release bundle could not be checksummed.
    #[error("{key}: failed to checksum release bundle {bundle:?}: {source}")]
    Checksum {
        /// Object being reconciled.
        key: ObjectKey,
        /// Bundle name.
        bundle: String,
        /// Underlying bundle error.
        #[source]
        source: release::Error,
    },

    /// Manifests could not be compiled.
    #[error("{key}: failed to compile deployment manifests: {source}")]
    Compile {
        /// Object being reconciled.
        key: ObjectKey,
        /// Underlying compiler error.
        #[source]
        source: deployer::Error,
    },

    /// Applying manifests failed.
    #[error("{key}: applying manifests failed: {source}")]
    Apply {
        /// Object being reconciled.
        key: ObjectKey,
        /// Underlying executor error.
        #[source]
        source: deployer::Error,
    },

    /// Destroying the inventory failed.
    #[error("{key}: failed to destroy deployment: {source}")]
    Destroy {
        /// Object being reconciled.
        key: ObjectKey,
        /// Underlying executor error.
        #[source]
        source: deployer::Error,
    },
}

impl Error {
    pub(crate) fn store(op: &'static str, key: &ObjectKey, source: StoreError) -> Self {
        Self::Store {
            op,
            key: key.clone(),
            source,
        }
    }

    /// The object this error belongs to
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Store { key, .. }
            | Self::UnknownBundle { key, .. }
            | Self::Checksum { key, .. }
            | Self::Compile { key, .. }
            | Self::Apply { key, .. }
            | Self::Destroy { key, .. } => key,
        }
    }

    /// Tool output captured before an apply or destroy failed
    pub fn transcript(&self) -> Option<&str> {
        match self {
            Self::Apply { source, .. } | Self::Destroy { source, .. } => source.transcript(),
            _ => None,
        }
    }

    /// How the controller should treat this error
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store { source, .. } if source.is_conflict() => ErrorCategory::Conflict,
            Self::UnknownBundle { .. } => ErrorCategory::Configuration,
            _ => ErrorCategory::Transient,
        }
    }
}
