use std::future::Future;
use std::sync::Arc;

use super::{assigned_to, insert_committed, make_history_entry, TestResult};
use crate::{StorageError, TicketStatus, TicketStore};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_assignments_exactly_one_wins",
        concurrent_assignments_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_tickets_all_succeed",
        concurrent_updates_different_tickets_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_get_distinct_numbers",
        concurrent_inserts_get_distinct_numbers(factory).await,
    ));

    results
}

/// Attempt Pending -> Assigned from version 0 with history; Ok(true) if this
/// task won, Ok(false) if it lost the OCC race.
async fn try_assign<S: TicketStore>(
    s: &S,
    ticket: &crate::TicketRecord,
    technician: &str,
) -> Result<bool, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let staged = async {
        s.update_ticket(&mut snap, 0, assigned_to(ticket, technician))
            .await?;
        s.append_history(
            &mut snap,
            make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Assigned),
        )
        .await
    }
    .await;
    let result = match staged {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Concurrent assignment: exactly one wins ─────────────────────────────────

/// N tasks each try to assign the same Pending ticket to a different
/// technician. Exactly one commit succeeds; the rest get ConcurrentConflict,
/// and the history holds exactly one Pending -> Assigned entry.
async fn concurrent_assignments_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let ticket = insert_committed(storage.as_ref(), "Race").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let t = ticket.clone();
        handles.push(tokio::spawn(async move {
            try_assign(s.as_ref(), &t, &format!("tech-{i}")).await
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let history = storage
        .list_history(&ticket.id)
        .await
        .map_err(|e| format!("history: {e}"))?;
    let from_pending = history
        .iter()
        .filter(|h| h.old_status == Some(TicketStatus::Pending))
        .count();
    if from_pending != 1 {
        return Err(format!(
            "expected one entry leaving Pending, found {from_pending}"
        ));
    }
    let rec = storage
        .get_ticket(&ticket.id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.version != 1 {
        return Err(format!("expected version 1, got {}", rec.version));
    }
    Ok(())
}

// ── Concurrent updates to different tickets: all succeed ────────────────────

async fn concurrent_updates_different_tickets_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut tickets = Vec::new();
    for i in 0..N {
        tickets.push(insert_committed(storage.as_ref(), &format!("ticket-{i}")).await?);
    }

    let mut handles = Vec::new();
    for (i, t) in tickets.iter().cloned().enumerate() {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            try_assign(s.as_ref(), &t, &format!("tech-{i}")).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let won = handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
        if !won {
            return Err(format!("task {i} saw a false conflict"));
        }
    }

    for t in &tickets {
        let rec = storage
            .get_ticket(&t.id)
            .await
            .map_err(|e| format!("get #{}: {e}", t.number))?;
        if rec.status != TicketStatus::Assigned || rec.version != 1 {
            return Err(format!(
                "#{}: expected assigned at version 1, got {} at {}",
                t.number, rec.status, rec.version
            ));
        }
    }
    Ok(())
}

async fn concurrent_inserts_get_distinct_numbers<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let t = s
                .insert_ticket(&mut snap, super::make_new_ticket(&format!("ticket-{i}")))
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<i64, StorageError>(t.number)
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(
            handle
                .await
                .map_err(|e| format!("task panic: {e}"))?
                .map_err(|e| format!("insert failed: {e}"))?,
        );
    }
    numbers.sort_unstable();
    numbers.dedup();
    if numbers.len() != N {
        return Err(format!("expected {N} distinct numbers, got {}", numbers.len()));
    }
    Ok(())
}
