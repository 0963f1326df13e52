//! Ticket routes. Each handler resolves the caller, decodes the payload and
//! delegates to the workflow.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use helpdesk_storage::{CommentKind, TicketStatus};
use helpdesk_workflow::{AssignTicket, CreateTicket, Feedback, TicketQuery, Validation};
use serde::Deserialize;

use super::error::ApiError;
use super::handlers::{body, optional_body, query};
use super::middleware::CurrentActor;
use super::state::AppState;

type Shared = State<Arc<AppState>>;

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdate {
    status: TicketStatus,
    #[serde(default)]
    resolution_summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReasonBody {
    #[serde(default)]
    reason: Option<String>,
}

/// `deputy_id: null` removes the delegation.
#[derive(Debug, Deserialize)]
pub(crate) struct DelegateBody {
    deputy_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentBody {
    content: String,
    #[serde(default)]
    kind: Option<CommentKind>,
}

fn ok(value: impl serde::Serialize) -> impl IntoResponse {
    (StatusCode::OK, Json(value))
}

/// POST /tickets
pub(crate) async fn handle_create(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    payload: Result<Json<CreateTicket>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state.workflow.create(&actor, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /tickets?scope=&status=&type=&priority=
pub(crate) async fn handle_list(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    params: Result<Query<TicketQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let tickets = state.workflow.list_tickets(&actor, query(params)?).await?;
    Ok(ok(serde_json::json!({
        "count": tickets.len(),
        "tickets": tickets,
    })))
}

/// GET /tickets/{id}
pub(crate) async fn handle_get(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.get_ticket(&actor, &id).await?))
}

/// GET /tickets/{id}/history
pub(crate) async fn handle_history(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.workflow.get_history(&actor, &id).await?;
    Ok(ok(serde_json::json!({ "history": history })))
}

/// GET /tickets/{id}/rejection-reason
pub(crate) async fn handle_rejection_reason(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = state.workflow.rejection_motive(&actor, &id).await?;
    Ok(ok(serde_json::json!({ "reason": reason })))
}

/// PUT /tickets/{id}/assign
pub(crate) async fn handle_assign(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<AssignTicket>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.assign(&actor, &id, body(payload)?).await?))
}

/// PUT /tickets/{id}/reassign
pub(crate) async fn handle_reassign(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<AssignTicket>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.reassign(&actor, &id, body(payload)?).await?))
}

/// PUT /tickets/{id}/reopen
pub(crate) async fn handle_reopen(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<AssignTicket>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.reopen(&actor, &id, body(payload)?).await?))
}

/// PUT /tickets/{id}/escalate
pub(crate) async fn handle_escalate(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.escalate(&actor, &id).await?))
}

/// PUT /tickets/{id}/status
pub(crate) async fn handle_status(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let update = body(payload)?;
    let ticket = state
        .workflow
        .set_status(&actor, &id, update.status, update.resolution_summary)
        .await?;
    Ok(ok(ticket))
}

/// PUT /tickets/{id}/validate
pub(crate) async fn handle_validate(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<Validation>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.validate(&actor, &id, body(payload)?).await?))
}

/// PUT /tickets/{id}/feedback
pub(crate) async fn handle_feedback(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<Feedback>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state
        .workflow
        .submit_feedback(&actor, &id, body(payload)?)
        .await?))
}

/// PUT /tickets/{id}/accept-assignment
pub(crate) async fn handle_accept(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(state.workflow.accept_assignment(&actor, &id).await?))
}

/// PUT /tickets/{id}/decline-assignment
pub(crate) async fn handle_decline(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<ReasonBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = optional_body(payload)?.reason;
    Ok(ok(state
        .workflow
        .decline_assignment(&actor, &id, reason)
        .await?))
}

/// PUT /tickets/{id}/delegate
pub(crate) async fn handle_delegate(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<DelegateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // the registry works on ids; resolve numbers through the workflow first
    let ticket = state.workflow.get_ticket(&actor, &id).await?;
    let ticket = match body(payload)?.deputy_id {
        Some(deputy) => state.delegation.delegate(&actor, &ticket.id, &deputy).await?,
        None => state.delegation.revoke(&actor, &ticket.id).await?,
    };
    Ok(ok(ticket))
}

/// GET /tickets/{id}/comments
pub(crate) async fn handle_list_comments(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state.workflow.list_comments(&actor, &id).await?;
    Ok(ok(serde_json::json!({ "comments": comments })))
}

/// POST /tickets/{id}/comments
pub(crate) async fn handle_add_comment(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    payload: Result<Json<CommentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = body(payload)?;
    let created = state
        .workflow
        .add_comment(&actor, &id, &comment.content, comment.kind)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /tickets/{id}/candidates
pub(crate) async fn handle_candidates(
    State(state): Shared,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let candidates = state.workflow.candidates(&actor, &id).await?;
    Ok(ok(serde_json::json!({ "candidates": candidates })))
}
