use crate::models::TaskStatus;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the orchestrator core.
///
/// Each kind maps onto a transport status code via [`Error::status_code`];
/// the transport layer does no interpretation beyond that mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Admitting the task would introduce a dependency cycle.
    #[error("Dependency cycle: {0}")]
    Cycle(String),

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The task state machine rejects the move.
    #[error("Invalid state transition from {0} to {1}")]
    InvalidTransition(TaskStatus, TaskStatus),

    /// Lock held by another holder, or the wait deadline elapsed.
    #[error("Lock acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// Release or extend attempted by a non-holder.
    #[error("Lock not held: {0}")]
    NotHeld(String),

    /// Authorization failure on a workspace or project.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Uniqueness or reserved-id violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or missing input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Underlying database error. The operation left no partial state.
    #[error("Storage fault: {0}")]
    Storage(String),

    /// Schema migration aborted. Fatal at startup.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    pub fn task_not_found(id: &str) -> Self {
        Self::NotFound(format!("task {id}"))
    }

    pub fn workspace_not_found(id: &str) -> Self {
        Self::NotFound(format!("workspace {id}"))
    }

    pub fn project_not_found(id: &str) -> Self {
        Self::NotFound(format!("project {id}"))
    }

    pub fn user_not_found(id: &str) -> Self {
        Self::NotFound(format!("user {id}"))
    }

    pub fn webhook_not_found(id: &str) -> Self {
        Self::NotFound(format!("webhook {id}"))
    }

    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("field '{field}' cannot be empty"))
    }

    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition(from, to)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Error::Cycle(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// HTTP status code equivalent for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Cycle(_) => 422,
            Error::NotFound(_) => 404,
            Error::InvalidTransition(_, _) => 409,
            Error::AcquisitionFailed(_) => 409,
            Error::NotHeld(_) => 403,
            Error::AccessDenied(_) => 403,
            Error::Conflict(_) => 409,
            Error::Validation(_) => 400,
            Error::Storage(_) => 500,
            Error::MigrationFailed(_) => 500,
        }
    }
}
