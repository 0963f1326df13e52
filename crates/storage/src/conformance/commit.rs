//! Atomic commit conformance tests.
//!
//! A commit applies every staged write or none of them, and refuses writes
//! that would break a storage-boundary invariant.

use std::future::Future;

use time::OffsetDateTime;

use super::{assigned_to, insert_committed, make_history_entry, TestResult};
use crate::{StorageError, TicketRecord, TicketStatus, TicketStore};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "multi_ticket_updates_all_visible_after_commit",
        multi_ticket_updates_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "invalid_ticket_rolls_back_whole_snapshot",
        invalid_ticket_rolls_back_whole_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "assignee_required_when_assigned",
        assignee_required_when_assigned(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "feedback_cannot_be_overwritten",
        feedback_cannot_be_overwritten(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "history_must_match_resulting_status",
        history_must_match_resulting_status(factory).await,
    ));

    results
}

fn closed_with_feedback(ticket: &TicketRecord, score: u8) -> TicketRecord {
    let mut next = ticket.clone();
    next.status = TicketStatus::Closed;
    next.technician_id = None;
    next.closed_at = Some(OffsetDateTime::now_utc());
    next.feedback_score = Some(score);
    next
}

async fn multi_ticket_updates_all_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = insert_committed(&s, "a").await?;
    let b = insert_committed(&s, "b").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (t, tech) in [(&a, "tech-1"), (&b, "tech-2")] {
        s.update_ticket(&mut snap, 0, assigned_to(t, tech))
            .await
            .map_err(|e| e.to_string())?;
        s.append_history(
            &mut snap,
            make_history_entry(&t.id, TicketStatus::Pending, TicketStatus::Assigned),
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for (t, tech) in [(&a, "tech-1"), (&b, "tech-2")] {
        let rec = s.get_ticket(&t.id).await.map_err(|e| e.to_string())?;
        if rec.technician_id.as_deref() != Some(tech) || rec.version != 1 {
            return Err(format!("ticket {} not updated by commit", t.number));
        }
    }
    Ok(())
}

/// One valid and one invalid update in the same snapshot: neither lands.
async fn invalid_ticket_rolls_back_whole_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let good = insert_committed(&s, "good").await?;
    let bad = insert_committed(&s, "bad").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&good, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    let mut broken = bad.clone();
    broken.status = TicketStatus::InProgress;
    s.update_ticket(&mut snap, 0, broken)
        .await
        .map_err(|e| e.to_string())?;
    if s.commit_snapshot(snap).await.is_ok() {
        return Err("snapshot with an invalid ticket committed".to_string());
    }
    let rec = s.get_ticket(&good.id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err("valid half of a failed commit was applied".to_string());
    }
    Ok(())
}

async fn assignee_required_when_assigned<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Wi-Fi").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut next = ticket.clone();
    next.status = TicketStatus::Assigned;
    s.update_ticket(&mut snap, 0, next)
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Assigned),
    )
    .await
    .map_err(|e| e.to_string())?;
    match s.commit_snapshot(snap).await {
        Err(StorageError::InvariantViolation { .. }) => Ok(()),
        Err(e) => Err(format!("expected InvariantViolation, got {e}")),
        Ok(()) => Err("assigned ticket without assignee committed".to_string()),
    }
}

async fn feedback_cannot_be_overwritten<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Badge reader").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, closed_with_feedback(&ticket, 4))
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Closed),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let current = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rescored = current.clone();
    rescored.feedback_score = Some(1);
    s.update_ticket(&mut snap, current.version, rescored)
        .await
        .map_err(|e| e.to_string())?;
    if s.commit_snapshot(snap).await.is_ok() {
        return Err("feedback score was overwritten".to_string());
    }
    let after = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if after.feedback_score != Some(4) {
        return Err(format!("stored score changed to {:?}", after.feedback_score));
    }
    Ok(())
}

async fn history_must_match_resulting_status<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Projector").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_history(
        &mut snap,
        make_history_entry(&ticket.id, TicketStatus::Pending, TicketStatus::Resolved),
    )
    .await
    .map_err(|e| e.to_string())?;
    if s.commit_snapshot(snap).await.is_ok() {
        return Err("history disagreeing with ticket status committed".to_string());
    }
    Ok(())
}
