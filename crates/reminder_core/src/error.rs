//! Engine-level error taxonomy surfaced to callers.
//!
//! Sink refusals are not errors at this level; they are reported through
//! `ScheduleReport` so the task stays persisted with an unscheduled trigger.

use crate::config::ConfigError;
use crate::model::task::{TaskId, TaskValidationError};
use crate::repo::task_store::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    /// Rejected before persistence; never retried automatically.
    Validation(TaskValidationError),
    /// No task with this id exists in the store.
    NotFound(TaskId),
    /// Durable write or read failed; the mutation did not happen.
    Storage(StorageError),
    /// Process runtime already bound to another database.
    AlreadyConfigured { active: PathBuf, requested: PathBuf },
    /// Engine configuration rejected at startup.
    Config(ConfigError),
    /// Process runtime used before `ensure_configured`.
    NotConfigured,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::AlreadyConfigured { active, requested } => write!(
                f,
                "engine already configured with `{}`; refusing to switch to `{}`",
                active.display(),
                requested.display()
            ),
            Self::Config(err) => write!(f, "{err}"),
            Self::NotConfigured => write!(f, "engine is not configured"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::NotFound(_) | Self::AlreadyConfigured { .. } | Self::NotConfigured => None,
        }
    }
}

impl From<TaskValidationError> for EngineError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StorageError> for EngineError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

impl EngineError {
    /// Stable short code for logs and FFI envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::AlreadyConfigured { .. } => "already_configured",
            Self::Config(_) => "config_error",
            Self::NotConfigured => "not_configured",
        }
    }
}
