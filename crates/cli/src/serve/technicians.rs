use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use helpdesk_workflow::{Operation, WorkflowError};

use super::error::ApiError;
use super::middleware::CurrentActor;
use super::state::AppState;

/// GET /technicians/{id}/workload
///
/// Staff see anyone's workload; technicians only their own.
pub(crate) async fn handle_workload(
    State(state): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(technician_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if actor.id != technician_id {
        helpdesk_workflow::authorize(Operation::ViewAll, &actor, None)?;
    }
    if state.directory.lookup(&technician_id).is_none() {
        return Err(WorkflowError::NotFound {
            what: format!("technician {}", technician_id),
        }
        .into());
    }
    let workload = state.workflow.workload(&technician_id).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "technician_id": technician_id,
            "workload": workload,
        })),
    ))
}
