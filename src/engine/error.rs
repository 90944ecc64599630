use thiserror::Error;

use crate::storage::StorageError;

/// Engine layer error type.
///
/// CAS conflicts never appear here: they are absorbed by the engine's
/// retry loop. Everything else is surfaced to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A storage operation failed (other than a CAS conflict).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding the workflow blob failed.
    #[error("workflow blob codec error")]
    Codec(#[from] serde_json::Error),

    /// No workflow is stored under the given id.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// `create` was called for an id that already exists.
    #[error("workflow already exists: {0}")]
    WorkflowExists(String),

    /// The workflow references a decider name that is not registered.
    #[error("decider not registered: {0}")]
    DeciderNotFound(String),

    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A lease-state violation on `extend_lease` (wrong owner or token,
    /// lease expired, task not leased).
    #[error("lease violation on task {task_id}: {reason}")]
    Lease { task_id: String, reason: String },

    /// A decider emitted a command the engine cannot apply.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl EngineError {
    pub(crate) fn lease(task_id: &str, reason: impl Into<String>) -> Self {
        EngineError::Lease {
            task_id: task_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
