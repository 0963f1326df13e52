//! Write staging shared by the store backends.
//!
//! A snapshot collects inserts, versioned updates, history entries and
//! comments without touching committed state. At commit time the backend
//! hands its committed view to [`Staging::validate`] while holding whatever
//! exclusive access it uses (a write lock, a database transaction), then
//! applies the staged writes.

use std::collections::{BTreeMap, HashMap};

use crate::error::StorageError;
use crate::record::{
    CommentRecord, HistoryRecord, NewHistoryEntry, NewTicket, TicketRecord, TicketStatus,
};

/// Committed state as seen by a commit in progress.
pub(crate) trait Committed {
    fn ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StorageError>;
    fn number_taken(&self, number: i64) -> Result<bool, StorageError>;
}

#[derive(Debug)]
pub(crate) struct Staged {
    /// `None` for tickets inserted by this snapshot.
    pub(crate) base_version: Option<i64>,
    pub(crate) record: TicketRecord,
}

#[derive(Debug, Default)]
pub(crate) struct Staging {
    pub(crate) tickets: BTreeMap<String, Staged>,
    pub(crate) history: Vec<NewHistoryEntry>,
    pub(crate) comments: Vec<CommentRecord>,
}

pub(crate) fn invariant(ticket_id: &str, message: impl Into<String>) -> StorageError {
    StorageError::InvariantViolation {
        ticket_id: ticket_id.to_string(),
        message: message.into(),
    }
}

/// A fresh Pending ticket at version 0.
pub(crate) fn new_record(number: i64, ticket: NewTicket) -> TicketRecord {
    TicketRecord {
        id: uuid::Uuid::new_v4().to_string(),
        number,
        ticket_type: ticket.ticket_type,
        title: ticket.title,
        description: ticket.description,
        creator_id: ticket.creator_id,
        creator_agency: ticket.creator_agency,
        created_at: ticket.created_at,
        priority: ticket.priority,
        status: TicketStatus::Pending,
        technician_id: None,
        secretary_id: None,
        resolved_by: None,
        resolution_summary: None,
        assigned_at: None,
        resolved_at: None,
        closed_at: None,
        auto_closed_at: None,
        feedback_score: None,
        feedback_comment: None,
        reminders_sent: 0,
        version: 0,
        updated_at: ticket.created_at,
    }
}

pub(crate) fn history_record(entry: NewHistoryEntry, seq: u32) -> HistoryRecord {
    HistoryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        ticket_id: entry.ticket_id,
        seq,
        old_status: entry.old_status,
        new_status: entry.new_status,
        user_id: entry.user_id,
        reason: entry.reason,
        metadata: entry.metadata,
        changed_at: entry.changed_at,
    }
}

impl Staging {
    pub(crate) fn insert(&mut self, record: TicketRecord) {
        self.tickets.insert(
            record.id.clone(),
            Staged {
                base_version: None,
                record,
            },
        );
    }

    pub(crate) fn is_staged(&self, ticket_id: &str) -> bool {
        self.tickets.contains_key(ticket_id)
    }

    pub(crate) fn staged_record(&self, ticket_id: &str) -> Option<TicketRecord> {
        self.tickets.get(ticket_id).map(|s| s.record.clone())
    }

    /// Stage `record` as the successor of `expected_version`.
    ///
    /// `committed_version` is only consulted when this snapshot has not
    /// already staged the ticket; `None` there means the ticket does not exist.
    pub(crate) fn stage_update(
        &mut self,
        expected_version: i64,
        committed_version: Option<i64>,
        mut record: TicketRecord,
    ) -> Result<i64, StorageError> {
        let conflict = |id: &str| StorageError::ConcurrentConflict {
            ticket_id: id.to_string(),
            expected_version,
        };
        let base_version = match (self.tickets.get(&record.id), committed_version) {
            (Some(staged), _) => {
                if staged.record.version != expected_version {
                    return Err(conflict(&record.id));
                }
                staged.base_version
            }
            (None, Some(current)) => {
                if current != expected_version {
                    return Err(conflict(&record.id));
                }
                Some(expected_version)
            }
            (None, None) => {
                return Err(StorageError::TicketNotFound {
                    ticket_id: record.id,
                })
            }
        };
        let new_version = expected_version + 1;
        record.version = new_version;
        self.tickets.insert(
            record.id.clone(),
            Staged {
                base_version,
                record,
            },
        );
        Ok(new_version)
    }

    fn knows(&self, committed: &impl Committed, ticket_id: &str) -> Result<bool, StorageError> {
        Ok(self.tickets.contains_key(ticket_id) || committed.ticket(ticket_id)?.is_some())
    }

    /// Check every staged write against the committed state.
    pub(crate) fn validate(&self, committed: &impl Committed) -> Result<(), StorageError> {
        for (id, staged) in &self.tickets {
            match (staged.base_version, committed.ticket(id)?) {
                (None, Some(_)) => {
                    return Err(StorageError::AlreadyExists {
                        ticket_id: id.clone(),
                    })
                }
                (None, None) => {
                    if committed.number_taken(staged.record.number)? {
                        return Err(invariant(
                            id,
                            format!("number {} already taken", staged.record.number),
                        ));
                    }
                }
                (Some(expected), Some(current)) => {
                    if current.version != expected {
                        return Err(StorageError::ConcurrentConflict {
                            ticket_id: id.clone(),
                            expected_version: expected,
                        });
                    }
                    if current.feedback_score.is_some()
                        && current.feedback_score != staged.record.feedback_score
                    {
                        return Err(invariant(id, "feedback score is already recorded"));
                    }
                    if current.number != staged.record.number {
                        return Err(invariant(id, "ticket number is immutable"));
                    }
                }
                (Some(_), None) => {
                    return Err(StorageError::TicketNotFound {
                        ticket_id: id.clone(),
                    })
                }
            }
            staged.record.check_invariants().map_err(|m| invariant(id, m))?;
        }

        // The last entry appended for a ticket must describe its resulting status.
        let mut last_status: HashMap<&str, TicketStatus> = HashMap::new();
        for entry in &self.history {
            if !self.knows(committed, &entry.ticket_id)? {
                return Err(invariant(&entry.ticket_id, "history for unknown ticket"));
            }
            last_status.insert(entry.ticket_id.as_str(), entry.new_status);
        }
        for (ticket_id, new_status) in last_status {
            let current = match self.tickets.get(ticket_id) {
                Some(staged) => Some(staged.record.status),
                None => committed.ticket(ticket_id)?.map(|t| t.status),
            };
            if current != Some(new_status) {
                return Err(invariant(
                    ticket_id,
                    format!(
                        "history records new status {} but ticket is {}",
                        new_status,
                        current.map(|s| s.as_str()).unwrap_or("missing")
                    ),
                ));
            }
        }

        for comment in &self.comments {
            if !self.knows(committed, &comment.ticket_id)? {
                return Err(invariant(&comment.ticket_id, "comment for unknown ticket"));
            }
        }
        Ok(())
    }
}
