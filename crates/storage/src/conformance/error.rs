use std::future::Future;

use time::OffsetDateTime;

use super::{assigned_to, insert_committed, make_history_entry, TestResult};
use crate::{CommentKind, CommentRecord, StorageError, TicketStatus, TicketStore};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_ticket_nonexistent",
        get_ticket_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_ticket_by_number_nonexistent",
        get_ticket_by_number_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_ticket_nonexistent",
        update_ticket_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "history_for_unknown_ticket_rejected",
        history_for_unknown_ticket_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "comment_for_unknown_ticket_rejected",
        comment_for_unknown_ticket_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "list_history_empty_for_nonexistent",
        list_history_empty_for_nonexistent(factory).await,
    ));

    results
}

async fn get_ticket_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_ticket("no-such-ticket").await {
        Err(StorageError::TicketNotFound { ticket_id }) if ticket_id == "no-such-ticket" => Ok(()),
        Err(e) => Err(format!("expected TicketNotFound(no-such-ticket), got {e}")),
        Ok(_) => Err("expected TicketNotFound, got Ok".to_string()),
    }
}

async fn get_ticket_by_number_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_ticket_by_number(4242).await {
        Err(StorageError::TicketNumberNotFound { number: 4242 }) => Ok(()),
        Err(e) => Err(format!("expected TicketNumberNotFound(4242), got {e}")),
        Ok(_) => Err("expected TicketNumberNotFound, got Ok".to_string()),
    }
}

/// Updating a ticket that was never committed fails, at update or at commit.
async fn update_ticket_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    // Borrow a well-formed record from another store instance.
    let donor = factory().await;
    let ghost = insert_committed(&donor, "ghost").await?;

    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s.update_ticket(&mut snap, 0, assigned_to(&ghost, "tech-1")).await {
        Ok(_) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::TicketNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected TicketNotFound, got {e}")),
        Ok(()) => Err("update of unknown ticket committed".to_string()),
    }
}

async fn history_for_unknown_ticket_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let appended = s
        .append_history(
            &mut snap,
            make_history_entry("missing", TicketStatus::Pending, TicketStatus::Assigned),
        )
        .await;
    let result = match appended {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => Err(e),
    };
    if result.is_ok() {
        return Err("history for unknown ticket was committed".to_string());
    }
    let history = s.list_history("missing").await.map_err(|e| e.to_string())?;
    if !history.is_empty() {
        return Err("rejected history entry is visible".to_string());
    }
    Ok(())
}

async fn comment_for_unknown_ticket_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let comment = CommentRecord {
        id: "c-1".to_string(),
        ticket_id: "missing".to_string(),
        user_id: "user-1".to_string(),
        content: "any news?".to_string(),
        kind: CommentKind::User,
        created_at: OffsetDateTime::now_utc(),
    };
    let result = match s.insert_comment(&mut snap, comment).await {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => Err(e),
    };
    if result.is_ok() {
        return Err("comment for unknown ticket was committed".to_string());
    }
    Ok(())
}

async fn list_history_empty_for_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: TicketStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let history = s.list_history("nothing").await.map_err(|e| e.to_string())?;
    let comments = s.list_comments("nothing").await.map_err(|e| e.to_string())?;
    if !history.is_empty() || !comments.is_empty() {
        return Err("expected empty history and comments".to_string());
    }
    Ok(())
}
