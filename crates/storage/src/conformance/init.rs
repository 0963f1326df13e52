use std::future::Future;

use super::{insert_committed, make_new_ticket, TestResult};
use crate::{TicketStatus, TicketStore};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_starts_pending_at_version_0",
        insert_starts_pending_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_leaves_assignee_and_timestamps_empty",
        insert_leaves_assignee_and_timestamps_empty(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "numbers_are_sequential_across_snapshots",
        numbers_are_sequential_across_snapshots(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "numbers_are_unique_within_snapshot",
        numbers_are_unique_within_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_ticket_readable_by_number",
        inserted_ticket_readable_by_number(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_ticket_readable_for_update_in_same_snapshot",
        inserted_ticket_readable_for_update_in_same_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "new_ticket_has_empty_history",
        new_ticket_has_empty_history(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// After insert + commit, the ticket is Pending at version 0.
async fn insert_starts_pending_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Printer offline").await?;
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    if rec.status != TicketStatus::Pending {
        return Err(format!("expected status pending, got {}", rec.status));
    }
    if rec.title != "Printer offline" {
        return Err(format!("title not preserved: {}", rec.title));
    }
    Ok(())
}

async fn insert_leaves_assignee_and_timestamps_empty<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "VPN down").await?;
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.technician_id.is_some() || rec.secretary_id.is_some() {
        return Err("new ticket must have no assignee and no delegate".to_string());
    }
    if rec.resolved_at.is_some() || rec.closed_at.is_some() || rec.feedback_score.is_some() {
        return Err("new ticket must have no terminal timestamps or feedback".to_string());
    }
    Ok(())
}

/// Numbers increase by one per committed insert.
async fn numbers_are_sequential_across_snapshots<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = insert_committed(&s, "a").await?;
    let b = insert_committed(&s, "b").await?;
    let c = insert_committed(&s, "c").await?;
    if !(a.number < b.number && b.number < c.number) {
        return Err(format!(
            "numbers not increasing: {}, {}, {}",
            a.number, b.number, c.number
        ));
    }
    Ok(())
}

async fn numbers_are_unique_within_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let a = s
        .insert_ticket(&mut snap, make_new_ticket("a"))
        .await
        .map_err(|e| e.to_string())?;
    let b = s
        .insert_ticket(&mut snap, make_new_ticket("b"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if a.number == b.number || a.id == b.id {
        return Err("two inserts in one snapshot share an id or number".to_string());
    }
    Ok(())
}

async fn inserted_ticket_readable_by_number<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Keyboard").await?;
    let rec = s
        .get_ticket_by_number(ticket.number)
        .await
        .map_err(|e| e.to_string())?;
    if rec.id != ticket.id {
        return Err(format!("number lookup returned {} not {}", rec.id, ticket.id));
    }
    Ok(())
}

async fn inserted_ticket_readable_for_update_in_same_snapshot<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let ticket = s
        .insert_ticket(&mut snap, make_new_ticket("Mouse"))
        .await
        .map_err(|e| e.to_string())?;
    let rec = s
        .get_ticket_for_update(&mut snap, &ticket.id)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if rec.id != ticket.id {
        return Err("snapshot did not see its own insert".to_string());
    }
    Ok(())
}

async fn new_ticket_has_empty_history<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Scanner").await?;
    let history = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if !history.is_empty() {
        return Err(format!("expected empty history, got {} entries", history.len()));
    }
    Ok(())
}
