//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted or dropped writes are discarded.

use std::future::Future;

use super::{assigned_to, insert_committed, make_history_entry, make_new_ticket, TestResult};
use crate::{TicketFilter, TicketStatus, TicketStore};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible_to_get",
        uncommitted_insert_invisible_to_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible_to_list",
        uncommitted_insert_invisible_to_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_history_invisible",
        uncommitted_history_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_update_and_history",
        abort_discards_update_and_history(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_discards_writes",
        dropped_snapshot_discards_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_its_own_update",
        snapshot_reads_its_own_update(factory).await,
    ));

    results
}

async fn uncommitted_insert_invisible_to_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let ticket = s
        .insert_ticket(&mut snap, make_new_ticket("hidden"))
        .await
        .map_err(|e| e.to_string())?;
    let visible = s.get_ticket(&ticket.id).await.is_ok();
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if visible {
        return Err("uncommitted insert visible to get_ticket".to_string());
    }
    Ok(())
}

async fn uncommitted_insert_invisible_to_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_ticket(&mut snap, make_new_ticket("hidden"))
        .await
        .map_err(|e| e.to_string())?;
    let listed = s
        .list_tickets(&TicketFilter::default())
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if !listed.is_empty() {
        return Err(format!("expected no tickets listed, got {}", listed.len()));
    }
    Ok(())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Laptop battery").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    let seen = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if seen.status != TicketStatus::Pending || seen.version != 0 {
        return Err(format!(
            "uncommitted update visible: status {} version {}",
            seen.status, seen.version
        ));
    }
    Ok(())
}

async fn uncommitted_history_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Phone").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Assigned),
    )
    .await
    .map_err(|e| e.to_string())?;
    let before = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let after = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if !before.is_empty() {
        return Err("history visible before commit".to_string());
    }
    if after.len() != 1 {
        return Err(format!("expected 1 history entry after commit, got {}", after.len()));
    }
    Ok(())
}

async fn abort_discards_update_and_history<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Monitor").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Assigned),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    let history = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.status != TicketStatus::Pending || !history.is_empty() {
        return Err("aborted writes are visible".to_string());
    }
    Ok(())
}

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Headset").await?;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
            .await
            .map_err(|e| e.to_string())?;
    }
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("dropped snapshot leaked version {}", rec.version));
    }
    Ok(())
}

async fn snapshot_reads_its_own_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Docking station").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    let rec = s
        .get_ticket_for_update(&mut snap, &ticket.id)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if rec.status != TicketStatus::Assigned || rec.version != 1 {
        return Err(format!(
            "snapshot read its own update as status {} version {}",
            rec.status, rec.version
        ));
    }
    Ok(())
}
