use helpdesk_storage::StorageError;

/// Errors returned by workflow operations.
///
/// Guard violations (`NotFound`, `Forbidden`, `InvalidTransition`,
/// `Validation`) are permanent. `Conflict` means another writer committed
/// first: reload and retry. `Directory` failures are transient; `Storage`
/// is transient only when the backend says so.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("ticket {ticket_id} was modified concurrently; reload and retry")]
    Conflict { ticket_id: String },

    #[error("directory unavailable: {0}")]
    Directory(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl WorkflowError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        WorkflowError::NotFound { what: what.into() }
    }

    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::InvalidTransition(_) => "invalid_transition",
            WorkflowError::Validation(_) => "validation_error",
            WorkflowError::Conflict { .. } => "conflict",
            WorkflowError::Directory(_) => "directory_unavailable",
            WorkflowError::Storage(_) => "storage_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Conflict { .. } | WorkflowError::Directory(_) => true,
            WorkflowError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConcurrentConflict { ticket_id, .. } => {
                WorkflowError::Conflict { ticket_id }
            }
            StorageError::TicketNotFound { ticket_id } => {
                WorkflowError::not_found(format!("ticket {}", ticket_id))
            }
            StorageError::TicketNumberNotFound { number } => {
                WorkflowError::not_found(format!("ticket #{}", number))
            }
            other => WorkflowError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_becomes_retryable_conflict() {
        let e: WorkflowError = StorageError::ConcurrentConflict {
            ticket_id: "t-1".into(),
            expected_version: 3,
        }
        .into();
        assert!(matches!(e, WorkflowError::Conflict { ref ticket_id } if ticket_id == "t-1"));
        assert!(e.is_retryable());
    }

    #[test]
    fn guard_errors_are_permanent() {
        assert!(!WorkflowError::Forbidden("x".into()).is_retryable());
        assert!(!WorkflowError::Validation("x".into()).is_retryable());
        assert!(!WorkflowError::InvalidTransition("x".into()).is_retryable());
        let nf: WorkflowError = StorageError::TicketNumberNotFound { number: 9 }.into();
        assert_eq!(nf.kind(), "not_found");
        assert_eq!(nf.to_string(), "ticket #9 not found");
    }

    #[test]
    fn storage_retry_follows_the_backend() {
        let broken: WorkflowError = StorageError::InvariantViolation {
            ticket_id: "t-1".into(),
            message: "assignee missing".into(),
        }
        .into();
        assert_eq!(broken.kind(), "storage_error");
        assert!(!broken.is_retryable());

        let dup: WorkflowError = StorageError::AlreadyExists {
            ticket_id: "t-1".into(),
        }
        .into();
        assert!(!dup.is_retryable());

        let io: WorkflowError = StorageError::Backend("disk I/O error".into()).into();
        assert!(io.is_retryable());
    }
}
