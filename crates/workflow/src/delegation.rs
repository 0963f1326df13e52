use std::sync::Arc;

use helpdesk_storage::{TicketRecord, TicketStore};
use tracing::{info, warn};

use crate::actor::{Actor, Role};
use crate::directory::UserDirectory;
use crate::error::WorkflowError;
use crate::permissions::{self, Operation};

const MAX_ATTEMPTS: usize = 5;

/// Hands tickets to a deputy director for follow-up.
///
/// Delegation is a marker on the ticket (`secretary_id`). It does not change
/// status or write history. Concurrent delegations of one ticket resolve as
/// last-writer-wins: each attempt reloads the ticket and retries on version
/// conflicts.
pub struct DelegationRegistry<S: TicketStore> {
    store: Arc<S>,
    users: Arc<dyn UserDirectory>,
}

impl<S: TicketStore> DelegationRegistry<S> {
    pub fn new(store: Arc<S>, users: Arc<dyn UserDirectory>) -> Self {
        DelegationRegistry { store, users }
    }

    pub async fn delegate(
        &self,
        actor: &Actor,
        ticket_id: &str,
        deputy_id: &str,
    ) -> Result<TicketRecord, WorkflowError> {
        permissions::authorize(Operation::Delegate, actor, None)?;
        let deputy = self
            .users
            .get_user(deputy_id)
            .await
            .map_err(|e| WorkflowError::Directory(e.to_string()))?
            .ok_or_else(|| WorkflowError::not_found(format!("user {}", deputy_id)))?;
        if deputy.role != Role::DeputyDirector || !deputy.active {
            return Err(WorkflowError::Validation(format!(
                "{} is not an active deputy director",
                deputy_id
            )));
        }
        self.set_marker(actor, ticket_id, Some(deputy.id)).await
    }

    pub async fn revoke(&self, actor: &Actor, ticket_id: &str) -> Result<TicketRecord, WorkflowError> {
        permissions::authorize(Operation::Delegate, actor, None)?;
        self.set_marker(actor, ticket_id, None).await
    }

    pub async fn is_delegated_to(&self, ticket_id: &str, user_id: &str) -> Result<bool, WorkflowError> {
        let ticket = self.store.get_ticket(ticket_id).await?;
        Ok(is_delegated_to(&ticket, user_id))
    }

    async fn set_marker(
        &self,
        actor: &Actor,
        ticket_id: &str,
        marker: Option<String>,
    ) -> Result<TicketRecord, WorkflowError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.store.get_ticket(ticket_id).await?;
            if current.status.is_terminal() {
                return Err(WorkflowError::InvalidTransition(format!(
                    "ticket #{} is closed",
                    current.number
                )));
            }
            if current.secretary_id == marker {
                return Ok(current);
            }
            let mut next = current.clone();
            next.secretary_id = marker.clone();
            next.updated_at = time::OffsetDateTime::now_utc();

            let mut snap = self.store.begin_snapshot().await?;
            let written = match self
                .store
                .update_ticket(&mut snap, current.version, next.clone())
                .await
            {
                Ok(version) => match self.store.commit_snapshot(snap).await {
                    Ok(()) => Ok(version),
                    Err(e) => Err(e),
                },
                Err(e) => {
                    self.store.abort_snapshot(snap).await?;
                    Err(e)
                }
            };
            match written.map_err(WorkflowError::from) {
                Ok(version) => {
                    next.version = version;
                    info!(
                        ticket = next.number,
                        delegate = ?next.secretary_id,
                        actor = %actor.id,
                        "delegation updated"
                    );
                    return Ok(next);
                }
                Err(WorkflowError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                    warn!(ticket = current.number, attempt, "delegation conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn is_delegated_to(ticket: &TicketRecord, user_id: &str) -> bool {
    ticket.secretary_id.as_deref() == Some(user_id)
}
