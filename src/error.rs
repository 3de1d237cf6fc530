//! Unified error types for cortex.
//!
//! Two kinds of failure flow through this enum. Domain errors (`NotFound`,
//! `InvalidPolicy`, `ConfirmationRequired`, `AlreadyExists`) are returned to
//! the caller and never swallowed. Collaborator errors (`CollaboratorTimeout`,
//! `CollaboratorUnavailable`) are returned by anything that calls the embedder
//! or the LLM; a few call sites (deep reflection, classifier tie-break) fall
//! back to a cheaper path on exactly these. Infrastructure noise that must not
//! stop a sweep goes through [`FailOpen`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for cortex operations.
#[derive(Error, Debug)]
pub enum CortexError {
    /// I/O errors from index, backup, archive or JSONL files.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Unknown bullet, suggestion, backup, episode or procedure id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Unknown enum value (policy, pool, schedule, task...).
    #[error("invalid {kind}: '{value}'")]
    InvalidPolicy { kind: &'static str, value: String },

    /// Prune candidate count exceeds the confirmation threshold without force.
    #[error("confirmation required: {count} candidates exceed threshold {threshold} (use force)")]
    ConfirmationRequired { count: usize, threshold: usize },

    /// An embedding or LLM call exceeded its deadline.
    #[error("{collaborator} timed out after {timeout_ms}ms")]
    CollaboratorTimeout {
        collaborator: &'static str,
        timeout_ms: u64,
    },

    /// A collaborator is disabled, missing or returned an error.
    #[error("{collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        message: String,
    },

    /// A uniqueness rule was violated (duplicate id, second active suggestion).
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Operation not allowed in the current state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// A specialized Result type for cortex operations.
pub type Result<T> = std::result::Result<T, CortexError>;

impl CortexError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid policy / enum value error.
    pub fn invalid_policy(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            kind,
            value: value.into(),
        }
    }

    pub fn confirmation_required(count: usize, threshold: usize) -> Self {
        Self::ConfirmationRequired { count, threshold }
    }

    pub fn timeout(collaborator: &'static str, timeout_ms: u64) -> Self {
        Self::CollaboratorTimeout {
            collaborator,
            timeout_ms,
        }
    }

    pub fn unavailable(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            collaborator,
            message: message.into(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// True for timeouts and unavailable collaborators.
    ///
    /// Callers with a cheaper fallback path (deep reflection, classifier
    /// tie-break) switch to it on these and propagate everything else.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorTimeout { .. } | Self::CollaboratorUnavailable { .. }
        )
    }
}

impl From<io::Error> for CortexError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for CortexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Log-and-substitute error handling for work that must not abort a sweep.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the cortex CLI.
pub mod exit_codes {
    /// Command succeeded.
    pub const SUCCESS: i32 = 0;

    /// Command failed.
    pub const FAILURE: i32 = 1;

    /// A destructive command needs `--force`.
    pub const CONFIRMATION_REQUIRED: i32 = 2;
}
