//! Error types for compile, apply and destroy operations.

use std::io;
use std::path::PathBuf;

/// Result type alias for deployer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling or executing manifests.
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

    /// The external program could not be started or waited on.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The external program exited unsuccessfully.
    #[error("{program} failed ({}) -- stderr={}", exit_label(.code), .stderr.trim())]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Captured stdout transcript.
        stdout: String,
        /// Captured diagnostic stream.
        stderr: String,
    },

    /// The call was cancelled or hit its deadline; the process was killed.
    #[error("{program} {}", cancel_label(.timed_out))]
    Cancelled {
        /// Program name.
        program: String,
        /// Whether the deadline expired (as opposed to explicit cancellation).
        timed_out: bool,
    },

    /// Release bundle could not be read or extracted.
    #[error("release bundle error: {0}")]
    Bundle(#[from] release::Error),

    /// YAML could not be parsed or produced.
    #[error("invalid YAML in {context}: {source}")]
    Yaml {
        /// What was being parsed or serialized.
        context: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The overlay could not be rendered.
    #[error("render failed: {0}")]
    Render(String),

    /// An object key string was malformed.
    #[error("invalid object key {0:?}: expected <namespace>/<name>")]
    InvalidKey(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(context: impl Into<String>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            context: context.into(),
            source,
        }
    }

    /// Whether this error was caused by cancellation or a deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Stdout captured before a command failed, if any
    pub fn transcript(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stdout, .. } if !stdout.is_empty() => Some(stdout),
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn cancel_label(timed_out: &bool) -> &'static str {
    if *timed_out {
        "timed out"
    } else {
        "was cancelled"
    }
}
