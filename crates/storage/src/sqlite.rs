//! SQLite-backed `TicketStore`.
//!
//! Several processes may open the same database file. Each commit runs in an
//! `IMMEDIATE` transaction, which takes SQLite's write lock before any staged
//! write is validated, and every update is guarded with
//! `WHERE version = <base>`. A writer in another process that committed first
//! therefore turns the later commit into `ConcurrentConflict` instead of a
//! silent overwrite. Ticket numbers come from a counter row updated in its
//! own statement, so they are distinct across processes too.
//!
//! Rows keep the searchable columns next to a JSON body holding the full
//! record. All database work runs on the blocking pool.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::record::{
    CommentRecord, HistoryRecord, NewHistoryEntry, NewTicket, TicketFilter, TicketRecord,
};
use crate::staging::{self, Committed, Staging};
use crate::traits::TicketStore;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id TEXT PRIMARY KEY,
        number INTEGER NOT NULL UNIQUE,
        version INTEGER NOT NULL,
        status TEXT NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);

    CREATE TABLE IF NOT EXISTS history (
        id TEXT PRIMARY KEY,
        ticket_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        body TEXT NOT NULL,
        UNIQUE (ticket_id, seq)
    );

    CREATE TABLE IF NOT EXISTS comments (
        pos INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        ticket_id TEXT NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id);

    CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO counters (name, value) VALUES ('ticket_number', 0);
"#;

fn backend(e: impl Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend(format!("encoding row: {}", e)))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Backend(format!("corrupt row: {}", e)))
}

fn load_ticket(conn: &Connection, ticket_id: &str) -> Result<Option<TicketRecord>, StorageError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM tickets WHERE id = ?1",
            params![ticket_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    body.as_deref().map(decode).transpose()
}

fn load_bodies<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<T>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(backend)?;
    let mut out = Vec::new();
    for raw in rows {
        out.push(decode(&raw.map_err(backend)?)?);
    }
    Ok(out)
}

impl Committed for Connection {
    fn ticket(&self, ticket_id: &str) -> Result<Option<TicketRecord>, StorageError> {
        load_ticket(self, ticket_id)
    }

    fn number_taken(&self, number: i64) -> Result<bool, StorageError> {
        self.query_row(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE number = ?1)",
            params![number],
            |row| row.get(0),
        )
        .map_err(backend)
    }
}

/// Write a validated staging inside the caller's transaction.
fn write_staging(conn: &Connection, staging: Staging) -> Result<(), StorageError> {
    for (id, staged) in staging.tickets {
        let record = &staged.record;
        let body = encode(record)?;
        match staged.base_version {
            None => {
                conn.execute(
                    "INSERT INTO tickets (id, number, version, status, body)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, record.number, record.version, record.status.as_str(), body],
                )
                .map_err(backend)?;
            }
            Some(base) => {
                let changed = conn
                    .execute(
                        "UPDATE tickets SET version = ?1, status = ?2, body = ?3
                         WHERE id = ?4 AND version = ?5",
                        params![record.version, record.status.as_str(), body, id, base],
                    )
                    .map_err(backend)?;
                if changed != 1 {
                    return Err(StorageError::ConcurrentConflict {
                        ticket_id: id,
                        expected_version: base,
                    });
                }
            }
        }
    }

    for entry in staging.history {
        let seq: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM history WHERE ticket_id = ?1",
                params![entry.ticket_id],
                |row| row.get(0),
            )
            .map_err(backend)?;
        let record = staging::history_record(entry, seq);
        conn.execute(
            "INSERT INTO history (id, ticket_id, seq, body) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.ticket_id, record.seq, encode(&record)?],
        )
        .map_err(backend)?;
    }

    for comment in staging.comments {
        conn.execute(
            "INSERT INTO comments (id, ticket_id, body) VALUES (?1, ?2, ?3)",
            params![comment.id, comment.ticket_id, encode(&comment)?],
        )
        .map_err(backend)?;
    }
    Ok(())
}

/// An in-progress transaction against a [`SqliteStore`].
///
/// Writes stay in the snapshot until commit; the database transaction only
/// spans `commit_snapshot`.
#[derive(Debug, Default)]
pub struct SqliteSnapshot {
    staging: Staging,
}

/// Ticket store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let opening = |e: rusqlite::Error| {
            StorageError::Backend(format!("opening '{}': {}", path.display(), e))
        };
        let conn = Connection::open(&path).map_err(opening)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(opening)?;
        // WAL lets readers in other processes proceed while one writer commits.
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(opening)?;
        conn.execute_batch(SCHEMA).map_err(opening)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// A private in-memory database, gone when the last clone is dropped.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StorageError::Backend("connection lock poisoned".to_string()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl TicketStore for SqliteStore {
    type Snapshot = SqliteSnapshot;

    async fn begin_snapshot(&self) -> Result<SqliteSnapshot, StorageError> {
        Ok(SqliteSnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        let staging = snapshot.staging;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(backend)?;
            staging.validate(&*tx)?;
            write_staging(&tx, staging)?;
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn abort_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_ticket(
        &self,
        snapshot: &mut SqliteSnapshot,
        ticket: NewTicket,
    ) -> Result<TicketRecord, StorageError> {
        let number = self
            .with_conn(|conn| {
                conn.query_row(
                    "UPDATE counters SET value = value + 1
                     WHERE name = 'ticket_number' RETURNING value",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(backend)
            })
            .await?;
        let record = staging::new_record(number, ticket);
        snapshot.staging.insert(record.clone());
        Ok(record)
    }

    async fn get_ticket_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        ticket_id: &str,
    ) -> Result<TicketRecord, StorageError> {
        match snapshot.staging.staged_record(ticket_id) {
            Some(record) => Ok(record),
            None => self.get_ticket(ticket_id).await,
        }
    }

    async fn update_ticket(
        &self,
        snapshot: &mut SqliteSnapshot,
        expected_version: i64,
        record: TicketRecord,
    ) -> Result<i64, StorageError> {
        let committed = if snapshot.staging.is_staged(&record.id) {
            None
        } else {
            let id = record.id.clone();
            self.with_conn(move |conn| {
                conn.query_row(
                    "SELECT version FROM tickets WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(backend)
            })
            .await?
        };
        snapshot
            .staging
            .stage_update(expected_version, committed, record)
    }

    async fn append_history(
        &self,
        snapshot: &mut SqliteSnapshot,
        entry: NewHistoryEntry,
    ) -> Result<(), StorageError> {
        snapshot.staging.history.push(entry);
        Ok(())
    }

    async fn insert_comment(
        &self,
        snapshot: &mut SqliteSnapshot,
        comment: CommentRecord,
    ) -> Result<(), StorageError> {
        snapshot.staging.comments.push(comment);
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketRecord, StorageError> {
        let id = ticket_id.to_string();
        self.with_conn(move |conn| {
            load_ticket(conn, &id)?.ok_or(StorageError::TicketNotFound { ticket_id: id })
        })
        .await
    }

    async fn get_ticket_by_number(&self, number: i64) -> Result<TicketRecord, StorageError> {
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM tickets WHERE number = ?1",
                    params![number],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            match body {
                Some(raw) => decode(&raw),
                None => Err(StorageError::TicketNumberNotFound { number }),
            }
        })
        .await
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<TicketRecord>, StorageError> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let tickets: Vec<TicketRecord> = match filter.status {
                Some(status) => load_bodies(
                    conn,
                    "SELECT body FROM tickets WHERE status = ?1 ORDER BY number DESC",
                    params![status.as_str()],
                )?,
                None => load_bodies(
                    conn,
                    "SELECT body FROM tickets ORDER BY number DESC",
                    params![],
                )?,
            };
            Ok(tickets.into_iter().filter(|t| filter.matches(t)).collect())
        })
        .await
    }

    async fn list_history(&self, ticket_id: &str) -> Result<Vec<HistoryRecord>, StorageError> {
        let id = ticket_id.to_string();
        self.with_conn(move |conn| {
            load_bodies(
                conn,
                "SELECT body FROM history WHERE ticket_id = ?1 ORDER BY seq",
                params![id],
            )
        })
        .await
    }

    async fn list_comments(&self, ticket_id: &str) -> Result<Vec<CommentRecord>, StorageError> {
        let id = ticket_id.to_string();
        self.with_conn(move |conn| {
            load_bodies(
                conn,
                "SELECT body FROM comments WHERE ticket_id = ?1 ORDER BY pos",
                params![id],
            )
        })
        .await
    }
}
