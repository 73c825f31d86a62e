use std::sync::Arc;

use thiserror::Error;

/// A shared, clonable computation error.
///
/// Goal results are broadcast to every awaiter, so the failure itself has to
/// be clonable. The underlying `anyhow::Error` is reference-counted and the
/// original chain of causes is preserved.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct SharedError(#[from] pub(crate) Arc<anyhow::Error>);

impl SharedError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for SharedError {
    fn from(e: anyhow::Error) -> Self {
        SharedError(Arc::new(e))
    }
}

/// Errors raised by [`Name`](crate::Name) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("cannot cut a token from a single-token name")]
    InvalidOperation,
}

/// Terminal failure of a [`Goal`](crate::Goal).
#[derive(Debug, Error, Clone)]
pub enum GoalError {
    /// The goal was cancelled before its computation started.
    #[error("computation was cancelled")]
    Cancelled,

    /// The computation itself, or one of its upstream goals, failed.
    #[error(transparent)]
    Failed(#[from] SharedError),
}

impl GoalError {
    pub(crate) fn failed(err: impl Into<anyhow::Error>) -> Self {
        GoalError::Failed(SharedError::new(err))
    }
}

/// Errors surfaced while constructing or destroying a cache.
///
/// Faults on the read/write hot path are never surfaced through this type;
/// they are logged and recovered from, since caching is an optimization and
/// not a correctness requirement.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("couldn't access the cache directory\n{0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`Workspace`](crate::Workspace) orchestration.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("target '{0}' not found")]
    TargetNotFound(String),

    #[error("data '{0}' not found")]
    DataNotFound(String),

    #[error("task '{task}': input '{name}' has type '{found}', expected '{expected}'")]
    TypeMismatch {
        task: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("a non-empty name is required here")]
    AnonymousNotAllowed,

    #[error("invalid data mask '{0}'\n{1}")]
    Mask(String, glob::PatternError),

    #[error("task '{0}':\n{1}")]
    Task(String, anyhow::Error),

    #[error(transparent)]
    Goal(#[from] GoalError),
}
