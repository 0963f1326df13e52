//! In-memory `TicketStore` backend.
//!
//! Committed state lives behind a single `RwLock`. A snapshot stages its
//! writes privately; `commit_snapshot` re-validates every staged version
//! under the write lock, so two snapshots racing on the same ticket can never
//! both commit. Nothing is persisted: use [`SqliteStore`](crate::SqliteStore)
//! when state must outlive the process or be shared between processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{
    CommentRecord, HistoryRecord, NewHistoryEntry, NewTicket, TicketFilter, TicketRecord,
};
use crate::staging::{self, Committed, Staging};
use crate::traits::TicketStore;

#[derive(Debug, Default)]
struct State {
    tickets: HashMap<String, TicketRecord>,
    numbers: BTreeMap<i64, String>,
    history: HashMap<String, Vec<HistoryRecord>>,
    comments: HashMap<String, Vec<CommentRecord>>,
}

impl Committed for State {
    fn ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StorageError> {
        Ok(self.tickets.get(ticket_id).cloned())
    }

    fn number_taken(&self, number: i64) -> Result<bool, StorageError> {
        Ok(self.numbers.contains_key(&number))
    }
}

impl State {
    fn apply(&mut self, staging: Staging) {
        for (id, staged) in staging.tickets {
            self.numbers.insert(staged.record.number, id.clone());
            self.tickets.insert(id, staged.record);
        }
        for entry in staging.history {
            let list = self.history.entry(entry.ticket_id.clone()).or_default();
            let seq = list.len() as u32;
            list.push(staging::history_record(entry, seq));
        }
        for comment in staging.comments {
            self.comments
                .entry(comment.ticket_id.clone())
                .or_default()
                .push(comment);
        }
    }
}

/// An in-progress transaction against a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    staging: Staging,
}

/// In-memory ticket store. State is lost when dropped.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    next_number: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_number: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        snapshot.staging.validate(&*state)?;
        state.apply(snapshot.staging);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_ticket(
        &self,
        snapshot: &mut MemorySnapshot,
        ticket: NewTicket,
    ) -> Result<TicketRecord, StorageError> {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let record = staging::new_record(number, ticket);
        snapshot.staging.insert(record.clone());
        Ok(record)
    }

    async fn get_ticket_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        ticket_id: &str,
    ) -> Result<TicketRecord, StorageError> {
        match snapshot.staging.staged_record(ticket_id) {
            Some(record) => Ok(record),
            None => self.get_ticket(ticket_id).await,
        }
    }

    async fn update_ticket(
        &self,
        snapshot: &mut MemorySnapshot,
        expected_version: i64,
        record: TicketRecord,
    ) -> Result<i64, StorageError> {
        let committed = if snapshot.staging.is_staged(&record.id) {
            None
        } else {
            self.state
                .read()
                .await
                .tickets
                .get(&record.id)
                .map(|t| t.version)
        };
        snapshot
            .staging
            .stage_update(expected_version, committed, record)
    }

    async fn append_history(
        &self,
        snapshot: &mut MemorySnapshot,
        entry: NewHistoryEntry,
    ) -> Result<(), StorageError> {
        snapshot.staging.history.push(entry);
        Ok(())
    }

    async fn insert_comment(
        &self,
        snapshot: &mut MemorySnapshot,
        comment: CommentRecord,
    ) -> Result<(), StorageError> {
        snapshot.staging.comments.push(comment);
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, StorageError> {
        self.state
            .read()
            .await
            .tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| StorageError::TicketNotFound {
                ticket_id: ticket_id.to_string(),
            })
    }

    async fn get_ticket_by_number(&self, number: i64) -> Result<TicketRecord, StorageError> {
        let state = self.state.read().await;
        state
            .numbers
            .get(&number)
            .and_then(|id| state.tickets.get(id))
            .cloned()
            .ok_or(StorageError::TicketNumberNotFound { number })
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<TicketRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .numbers
            .values()
            .rev()
            .filter_map(|id| state.tickets.get(id))
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn list_history(&self, ticket_id: &str) -> Result<Vec<HistoryRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .history
            .get(ticket_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_comments(&self, ticket_id: &str) -> Result<Vec<CommentRecord>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .comments
            .get(ticket_id)
            .cloned()
            .unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Priority, TicketStatus, TicketType};
    use time::OffsetDateTime;

    fn new_ticket(title: &str) -> NewTicket {
        NewTicket {
            ticket_type: TicketType::Applicative,
            title: title.to_string(),
            description: "ERP login fails".to_string(),
            priority: Priority::Low,
            creator_id: "u-1".to_string(),
            creator_agency: Some("Head office".to_string()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = MemoryStore::new();
        let mut snap = store.begin_snapshot().await.unwrap();
        let ticket = store.insert_ticket(&mut snap, new_ticket("one")).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();

        // Assigned without a technician breaks the assignee invariant.
        let mut snap = store.begin_snapshot().await.unwrap();
        let mut bad = ticket.clone();
        bad.status = TicketStatus::Assigned;
        store.update_ticket(&mut snap, 0, bad).await.unwrap();
        let err = store.commit_snapshot(snap).await.unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation { .. }));

        let stored = store.get_ticket(&ticket.id).await.unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn aborted_insert_leaves_number_gap() {
        let store = MemoryStore::new();
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_ticket(&mut snap, new_ticket("gone")).await.unwrap();
        store.abort_snapshot(snap).await.unwrap();

        let mut snap = store.begin_snapshot().await.unwrap();
        let kept = store.insert_ticket(&mut snap, new_ticket("kept")).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();
        assert_eq!(kept.number, 2);
        assert!(store.get_ticket_by_number(1).await.is_err());
    }
}
