use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    CommentRecord, HistoryRecord, NewHistoryEntry, NewTicket, TicketFilter, TicketRecord,
};

/// The storage trait for ticket backends.
///
/// A `TicketStore` provides durable, transactional storage for tickets, their
/// append-only history and their comments.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, its writes MUST be discarded.
///
/// ## OCC Conflict Detection
///
/// `update_ticket` performs an optimistic concurrency check against the
/// ticket's `version`. A mismatch returns `StorageError::ConcurrentConflict`,
/// either immediately or at commit time if another snapshot committed in
/// between. A ticket's status change and the history entry describing it are
/// written in the same snapshot, so they become visible together or not at all.
///
/// ## Invariants
///
/// Backends reject, at commit, any ticket that fails
/// `TicketRecord::check_invariants`, any overwrite of an already recorded
/// feedback score, and any history entry for an unknown ticket. History has no
/// update or delete operation.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Ticket operations (within snapshot) ──────────────────────────────────

    /// Create a ticket in status `Pending` at version 0.
    ///
    /// Allocates the id and the next sequential `number`. Numbers follow
    /// sequence semantics: an aborted insert leaves a gap, numbers are never
    /// reused.
    async fn insert_ticket(
        &self,
        snapshot: &mut Self::Snapshot,
        ticket: NewTicket,
    ) -> Result<TicketRecord, StorageError>;

    /// Read a ticket as seen by this snapshot (its own staged writes included).
    ///
    /// Returns `Err(StorageError::TicketNotFound)` if the ticket does not exist.
    async fn get_ticket_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        ticket_id: &str,
    ) -> Result<TicketRecord, StorageError>;

    /// Replace a ticket, conditional on `version = expected_version`.
    ///
    /// The `version` field of `record` is ignored; the stored version becomes
    /// `expected_version + 1`, which is returned.
    async fn update_ticket(
        &self,
        snapshot: &mut Self::Snapshot,
        expected_version: i64,
        record: TicketRecord,
    ) -> Result<i64, StorageError>;

    /// Append a history entry. Entries for one ticket are ordered by append order.
    async fn append_history(
        &self,
        snapshot: &mut Self::Snapshot,
        entry: NewHistoryEntry,
    ) -> Result<(), StorageError>;

    /// Insert a comment.
    async fn insert_comment(
        &self,
        snapshot: &mut Self::Snapshot,
        comment: CommentRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ──────────────────────────────────

    /// Read a ticket's committed state without locking.
    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, StorageError>;

    /// Read a ticket by its human-facing number.
    async fn get_ticket_by_number(&self, number: i64) -> Result<TicketRecord, StorageError>;

    /// List committed tickets matching `filter`, newest (highest number) first.
    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<TicketRecord>, StorageError>;

    /// A ticket's history in chronological order. Empty for unknown tickets.
    async fn list_history(&self, ticket_id: &str) -> Result<Vec<HistoryRecord>, StorageError>;

    /// A ticket's comments, oldest first. Empty for unknown tickets.
    async fn list_comments(&self, ticket_id: &str) -> Result<Vec<CommentRecord>, StorageError>;
}
