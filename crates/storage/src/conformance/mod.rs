//! Conformance test suite for `TicketStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `TicketStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Insertion**: id/number allocation, initial status and version
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics, invariant enforcement
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **History**: append-only ordering, coupling with the status it describes
//! - **Concurrency**: real parallel tasks racing on one ticket
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use helpdesk_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod history;
mod init;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use time::OffsetDateTime;

use crate::record::{NewHistoryEntry, NewTicket, Priority, TicketRecord, TicketStatus, TicketType};
use crate::TicketStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_starts_pending_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(history::run_history_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_new_ticket(title: &str) -> NewTicket {
    NewTicket {
        ticket_type: TicketType::Material,
        title: title.to_string(),
        description: "Screen flickers after wake-up".to_string(),
        priority: Priority::Medium,
        creator_id: "user-1".to_string(),
        creator_agency: Some("North agency".to_string()),
        created_at: OffsetDateTime::now_utc(),
    }
}

/// A copy of `ticket` moved to Assigned with `technician` as assignee.
fn assigned_to(ticket: &TicketRecord, technician: &str) -> TicketRecord {
    let mut next = ticket.clone();
    next.status = TicketStatus::Assigned;
    next.technician_id = Some(technician.to_string());
    next.assigned_at = Some(OffsetDateTime::now_utc());
    next
}

fn make_history_entry(
    ticket_id: &str,
    old_status: TicketStatus,
    new_status: TicketStatus,
) -> NewHistoryEntry {
    NewHistoryEntry {
        ticket_id: ticket_id.to_string(),
        old_status: Some(old_status),
        new_status,
        user_id: "secretary-1".to_string(),
        reason: None,
        metadata: None,
        changed_at: OffsetDateTime::now_utc(),
    }
}

/// Insert and commit one ticket, returning its committed record.
async fn insert_committed<S: TicketStore>(s: &S, title: &str) -> Result<TicketRecord, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let ticket = s
        .insert_ticket(&mut snap, make_new_ticket(title))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit insert: {e}"))?;
    Ok(ticket)
}

/// Assign `ticket` to `technician` with its history entry, and commit.
async fn assign_committed<S: TicketStore>(
    s: &S,
    ticket: &TicketRecord,
    technician: &str,
) -> Result<i64, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let version = s
        .update_ticket(&mut snap, ticket.version, assigned_to(ticket, technician))
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, ticket.status, TicketStatus::Assigned),
    )
    .await
    .map_err(|e| format!("append: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit assign: {e}"))?;
    Ok(version)
}
