//! Error types for every failure mode described by the engine's design.

use thiserror::Error;

use crate::signature::Signature;

/// Errors raised while binding call arguments to a task's declared parameters.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("missing required argument `{0}`")]
    MissingArgument(String),

    #[error("unexpected argument `{0}` does not match any declared parameter")]
    UnknownArgument(String),

    #[error("argument `{0}` was supplied twice (once positionally, once by name)")]
    DuplicateArgument(String),
}

/// Errors raised while hashing a parameter value into a task's signature.
#[derive(Debug, Error)]
pub enum UnhashableValue {
    #[error("value for parameter `{parameter}` has no defined canonical hash: {reason}")]
    Unsupported { parameter: String, reason: String },
}

/// The single error type returned by every fallible engine operation.
///
/// Construction-time variants ([`EngineError::Bind`], [`EngineError::MissingInjectable`],
/// [`EngineError::Unhashable`]) surface immediately from [`crate::engine::Engine::spawn`]
/// and prevent handle creation. Execution-time variants attach to the failing
/// handle and propagate to dependents as [`EngineError::DependencyFailed`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("argument binding failed: {0}")]
    Bind(#[from] BindError),

    #[error("missing required injectable parameter `{0}` in the active context")]
    MissingInjectable(String),

    #[error("cannot hash parameter value: {0}")]
    Unhashable(#[from] UnhashableValue),

    #[error("cycle detected in task graph while scheduling task {0:?}")]
    CycleDetected(petgraph::graph::NodeIndex),

    #[error("task body failed: {0}")]
    TaskFailed(#[source] anyhow::Error),

    #[error("dependency with signature {0:?} failed, so this task was not run")]
    DependencyFailed(Signature),

    #[error("cache record corrupted: {0}")]
    CacheCorruption(String),

    #[error("persistence store I/O error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("run was cancelled")]
    Cancelled,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::CacheCorruption(format!("invalid JSON payload: {err}"))
    }
}

impl From<ciborium::de::Error<std::io::Error>> for EngineError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        EngineError::CacheCorruption(format!("invalid binary payload: {err}"))
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for EngineError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        EngineError::Storage(anyhow::anyhow!("failed to serialize value: {err}"))
    }
}
