/// All errors that can be returned by a TicketStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another writer committed a
    /// newer version of the ticket. The expected version was not found.
    #[error("concurrent conflict on ticket {ticket_id}: expected version {expected_version}")]
    ConcurrentConflict {
        ticket_id: String,
        expected_version: i64,
    },

    /// No ticket with the given id.
    #[error("ticket not found: {ticket_id}")]
    TicketNotFound { ticket_id: String },

    /// No ticket with the given human-facing number.
    #[error("ticket #{number} not found")]
    TicketNumberNotFound { number: i64 },

    /// A ticket with this id already exists.
    #[error("ticket already exists: {ticket_id}")]
    AlreadyExists { ticket_id: String },

    /// A write would break a storage-boundary invariant (assignee/status
    /// coupling, one-time feedback, history ordering).
    #[error("invariant violated on ticket {ticket_id}: {message}")]
    InvariantViolation { ticket_id: String, message: String },

    /// A backend-specific storage error (I/O, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether a caller may reasonably retry the operation after reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentConflict { .. } | StorageError::Backend(_)
        )
    }
}
