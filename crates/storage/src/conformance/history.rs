//! History conformance tests: append-only ordering and status coupling.

use std::future::Future;

use super::{assign_committed, assigned_to, insert_committed, make_history_entry, TestResult};
use crate::{HistoryMetadata, TicketStatus, TicketStore};

pub(super) async fn run_history_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "history",
        "history_in_append_order_with_dense_seq",
        history_in_append_order_with_dense_seq(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_length_never_decreases",
        history_length_never_decreases(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_preserves_reason_and_metadata",
        history_preserves_reason_and_metadata(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "same_status_entry_allowed",
        same_status_entry_allowed(factory).await,
    ));

    results
}

async fn history_in_append_order_with_dense_seq<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Server room too hot").await?;
    assign_committed(&s, &ticket, "tech-1").await?;
    let current = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    assign_committed(&s, &current, "tech-2").await?;

    let history = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if history.len() != 2 {
        return Err(format!("expected 2 entries, got {}", history.len()));
    }
    for (i, entry) in history.iter().enumerate() {
        if entry.seq as usize != i {
            return Err(format!("entry {i} has seq {}", entry.seq));
        }
    }
    if history[0].old_status != Some(TicketStatus::Pending)
        || history[1].old_status != Some(TicketStatus::Assigned)
    {
        return Err("entries out of chronological order".to_string());
    }
    Ok(())
}

async fn history_length_never_decreases<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Access card").await?;
    assign_committed(&s, &ticket, "tech-1").await?;
    let before = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;

    // A failed snapshot must not shorten or alter the committed history.
    let current = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&current, "tech-9"))
        .await
        .ok();
    drop(snap);

    let after = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if after != before {
        return Err("history changed without a committed append".to_string());
    }
    Ok(())
}

async fn history_preserves_reason_and_metadata<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Outlook crash").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    let mut entry = make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Assigned);
    entry.reason = Some("urgent | Instructions: call first".to_string());
    entry.metadata = Some(HistoryMetadata::Assignment {
        technician_id: "tech-1".to_string(),
        notes: Some("call first".to_string()),
    });
    s.append_history(&mut snap, entry)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let history = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    let stored = history.first().ok_or("no history stored")?;
    if stored.reason.as_deref() != Some("urgent | Instructions: call first") {
        return Err(format!("reason not preserved: {:?}", stored.reason));
    }
    match &stored.metadata {
        Some(HistoryMetadata::Assignment { technician_id, .. }) if technician_id == "tech-1" => {
            Ok(())
        }
        other => Err(format!("metadata not preserved: {other:?}")),
    }
}

/// Escalations and acknowledgements record an entry without a status change.
async fn same_status_entry_allowed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Slow laptop").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut escalated = ticket.clone();
    escalated.priority = escalated.priority.escalated();
    s.update_ticket(&mut snap, 0, escalated)
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Pending),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let history = s.list_history(&ticket.id).await.map_err(|e| e.to_string())?;
    if history.len() != 1 {
        return Err(format!("expected 1 entry, got {}", history.len()));
    }
    Ok(())
}
