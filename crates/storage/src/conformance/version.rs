//! Version validation (OCC) conformance tests.

use std::future::Future;

use super::{assign_committed, assigned_to, insert_committed, TestResult};
use crate::{StorageError, TicketStore};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "update_returns_incremented_version",
        update_returns_incremented_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "versions_increment_sequentially",
        versions_increment_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_returns_conflict",
        update_with_wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_has_correct_fields",
        conflict_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "two_snapshots_race_one_wins",
        two_snapshots_race_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "second_update_same_snapshot_uses_new_version",
        second_update_same_snapshot_uses_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "version_per_ticket_independent",
        version_per_ticket_independent(factory).await,
    ));

    results
}

async fn update_returns_incremented_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Toner").await?;
    let version = assign_committed(&s, &ticket, "tech-1").await?;
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if version != 1 || rec.version != 1 {
        return Err(format!(
            "expected version 1, update returned {version}, stored {}",
            rec.version
        ));
    }
    Ok(())
}

/// Reassigning five times in separate snapshots yields version 5.
async fn versions_increment_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Shared drive").await?;
    for i in 1..=5i64 {
        let current = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
        let version = assign_committed(&s, &current, &format!("tech-{i}")).await?;
        if version != i {
            return Err(format!("update {i} produced version {version}"));
        }
    }
    Ok(())
}

async fn update_with_wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Mailbox full").await?;
    for wrong in [-1i64, 1, 999] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        let result = match s
            .update_ticket(&mut snap, wrong, assigned_to(&ticket, "tech-1"))
            .await
        {
            Ok(_) => s.commit_snapshot(snap).await,
            Err(e) => Err(e),
        };
        match result {
            Err(StorageError::ConcurrentConflict { .. }) => {}
            Err(e) => return Err(format!("version {wrong}: expected conflict, got {e}")),
            Ok(()) => return Err(format!("version {wrong}: stale update committed")),
        }
    }
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 || rec.technician_id.is_some() {
        return Err("conflicting update changed the ticket".to_string());
    }
    Ok(())
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "License expired").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s
        .update_ticket(&mut snap, 7, assigned_to(&ticket, "tech-1"))
        .await
    {
        Ok(_) => s.commit_snapshot(snap).await,
        Err(e) => Err(e),
    };
    match result {
        Err(StorageError::ConcurrentConflict {
            ticket_id,
            expected_version,
        }) => {
            if ticket_id != ticket.id || expected_version != 7 {
                return Err(format!(
                    "conflict carried ({ticket_id}, {expected_version}), expected ({}, 7)",
                    ticket.id
                ));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
        Ok(()) => Err("expected ConcurrentConflict, got Ok".to_string()),
    }
}

/// Two snapshots both read v0; the first commits, the second must conflict
/// at update or at commit.
async fn two_snapshots_race_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Database slow").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_ticket(&mut first, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| format!("first update: {e}"))?;
    let second_update = s
        .update_ticket(&mut second, 0, assigned_to(&ticket, "tech-2"))
        .await;
    s.commit_snapshot(first)
        .await
        .map_err(|e| format!("first commit: {e}"))?;

    let second_result = match second_update {
        Ok(_) => s.commit_snapshot(second).await,
        Err(e) => Err(e),
    };
    match second_result {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        Err(e) => return Err(format!("expected conflict for loser, got {e}")),
        Ok(()) => return Err("both racing snapshots committed".to_string()),
    }

    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if rec.technician_id.as_deref() != Some("tech-1") {
        return Err(format!("winner's write lost: {:?}", rec.technician_id));
    }
    Ok(())
}

async fn second_update_same_snapshot_uses_new_version<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let ticket = insert_committed(&s, "Backup failed").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v1 = s
        .update_ticket(&mut snap, 0, assigned_to(&ticket, "tech-1"))
        .await
        .map_err(|e| e.to_string())?;
    let v2 = s
        .update_ticket(&mut snap, v1, assigned_to(&ticket, "tech-2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let rec = s.get_ticket(&ticket.id).await.map_err(|e| e.to_string())?;
    if v2 != 2 || rec.version != 2 || rec.technician_id.as_deref() != Some("tech-2") {
        return Err(format!(
            "expected version 2 assigned to tech-2, got version {} assigned to {:?}",
            rec.version, rec.technician_id
        ));
    }
    Ok(())
}

async fn version_per_ticket_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = insert_committed(&s, "a").await?;
    let b = insert_committed(&s, "b").await?;
    assign_committed(&s, &a, "tech-1").await?;
    let rec = s.get_ticket(&b.id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("unrelated ticket version moved to {}", rec.version));
    }
    Ok(())
}
