use std::sync::Arc;

use helpdesk_storage::{
    CommentKind, CommentRecord, HistoryMetadata, HistoryRecord, NewHistoryEntry, NewTicket,
    Priority, TicketFilter, TicketRecord, TicketStatus, TicketStore, TicketType,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::actor::{Actor, Role, TechnicianProfile};
use crate::directory::{TechnicianDirectory, UserDirectory};
use crate::error::WorkflowError;
use crate::notify::{
    NotificationEmitter, NotificationIntent, NotificationKind, Notifier, Recipient,
};
use crate::permissions::{self, Operation};
use crate::policy::{self, Candidate};
use crate::reason;

/// Payload for creating a ticket.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicket {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default = "default_priority")]
    pub priority: Priority,
}

fn default_priority() -> Priority {
    Priority::Medium
}

/// Payload for assign, reassign and reopen.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignTicket {
    pub technician_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Validation {
    pub validated: bool,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    /// Wide so out-of-range input reaches the range check as a validation
    /// error instead of failing to deserialize.
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Which slice of tickets a listing covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Tickets the caller created.
    #[default]
    Mine,
    /// Tickets actively assigned to the caller.
    Assigned,
    All,
    DelegatedToMe,
    NotDelegated,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketQuery {
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default, rename = "type")]
    pub ticket_type: Option<TicketType>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// History entry to write alongside a ticket update.
pub(crate) struct Entry {
    pub reason: Option<String>,
    pub metadata: Option<HistoryMetadata>,
    /// Attributed author; defaults to the acting user.
    pub user_id: Option<String>,
}

impl Entry {
    pub(crate) fn new(reason: Option<String>) -> Self {
        Entry {
            reason,
            metadata: None,
            user_id: None,
        }
    }

    pub(crate) fn text(reason: String) -> Self {
        Entry::new(Some(reason))
    }

    pub(crate) fn with(mut self, metadata: HistoryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The ticket state machine.
///
/// Every operation loads the committed ticket, checks permission and state
/// guards, then writes the new ticket together with its history entry in one
/// storage snapshot conditioned on the loaded version. A concurrent writer
/// makes the commit fail with [`WorkflowError::Conflict`]; nothing is
/// written in that case. Notifications go out only after a successful commit.
pub struct TicketWorkflow<S: TicketStore> {
    store: Arc<S>,
    users: Arc<dyn UserDirectory>,
    technicians: Arc<dyn TechnicianDirectory>,
    notifier: Notifier,
}

impl<S: TicketStore> Clone for TicketWorkflow<S> {
    fn clone(&self) -> Self {
        TicketWorkflow {
            store: self.store.clone(),
            users: self.users.clone(),
            technicians: self.technicians.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<S: TicketStore> TicketWorkflow<S> {
    /// Spawns the notification delivery task, so this must run within a
    /// Tokio runtime.
    pub fn new(
        store: Arc<S>,
        users: Arc<dyn UserDirectory>,
        technicians: Arc<dyn TechnicianDirectory>,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        TicketWorkflow {
            store,
            users,
            technicians,
            notifier: Notifier::spawn(emitter),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// Wait for every notification queued so far to reach the emitter.
    pub async fn flush_notifications(&self) {
        self.notifier.flush().await;
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Load a committed ticket by id, or by number when `reference` is
    /// numeric (an optional leading `#` is accepted).
    pub(crate) async fn load(&self, reference: &str) -> Result<TicketRecord, WorkflowError> {
        let numeric = reference.strip_prefix('#').unwrap_or(reference);
        match numeric.parse::<i64>() {
            Ok(number) => Ok(self.store.get_ticket_by_number(number).await?),
            Err(_) => Ok(self.store.get_ticket(reference).await?),
        }
    }

    /// Commit `next` over `current`, with an optional history entry, in one
    /// snapshot. Returns `next` carrying its new version.
    pub(crate) async fn commit(
        &self,
        actor_id: &str,
        current: &TicketRecord,
        mut next: TicketRecord,
        entry: Option<Entry>,
    ) -> Result<TicketRecord, WorkflowError> {
        let mut snap = self.store.begin_snapshot().await?;
        let staged = async {
            let version = self
                .store
                .update_ticket(&mut snap, current.version, next.clone())
                .await?;
            if let Some(entry) = entry {
                self.store
                    .append_history(
                        &mut snap,
                        NewHistoryEntry {
                            ticket_id: current.id.clone(),
                            old_status: Some(current.status),
                            new_status: next.status,
                            user_id: entry.user_id.unwrap_or_else(|| actor_id.to_string()),
                            reason: entry.reason,
                            metadata: entry.metadata,
                            changed_at: next.updated_at,
                        },
                    )
                    .await?;
            }
            Ok::<_, helpdesk_storage::StorageError>(version)
        }
        .await;
        let version = match staged {
            Ok(v) => v,
            Err(e) => {
                self.store.abort_snapshot(snap).await?;
                return Err(e.into());
            }
        };
        self.store.commit_snapshot(snap).await?;
        next.version = version;
        info!(
            ticket = next.number,
            from = %current.status,
            to = %next.status,
            actor = actor_id,
            version,
            "ticket updated"
        );
        Ok(next)
    }

    pub(crate) fn notify(&self, intents: Vec<NotificationIntent>) {
        self.notifier.enqueue(intents);
    }

    async fn technicians(&self) -> Result<Vec<TechnicianProfile>, WorkflowError> {
        self.technicians
            .list_technicians()
            .await
            .map_err(|e| WorkflowError::Directory(e.to_string()))
    }

    fn require_status(
        ticket: &TicketRecord,
        allowed: &[TicketStatus],
        op: Operation,
    ) -> Result<(), WorkflowError> {
        if allowed.contains(&ticket.status) {
            Ok(())
        } else {
            debug!(
                ticket = ticket.number,
                status = %ticket.status,
                op = op.as_str(),
                "status guard"
            );
            Err(WorkflowError::InvalidTransition(format!(
                "cannot {} ticket #{} in status {}",
                op.as_str(),
                ticket.number,
                ticket.status
            )))
        }
    }

    fn require_readable(actor: &Actor, ticket: &TicketRecord) -> Result<(), WorkflowError> {
        if permissions::can_read(actor, ticket) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(format!(
                "{} may not access ticket #{}",
                actor.id, ticket.number
            )))
        }
    }

    fn touched(ticket: &TicketRecord) -> TicketRecord {
        let mut next = ticket.clone();
        next.updated_at = OffsetDateTime::now_utc();
        next
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    pub async fn create(
        &self,
        actor: &Actor,
        input: CreateTicket,
    ) -> Result<TicketRecord, WorkflowError> {
        permissions::authorize(Operation::Create, actor, None)?;
        let title = input.title.trim();
        let description = input.description.trim();
        if title.is_empty() {
            return Err(WorkflowError::Validation("title must not be empty".into()));
        }
        if description.is_empty() {
            return Err(WorkflowError::Validation(
                "description must not be empty".into(),
            ));
        }
        let agency = self
            .users
            .get_user(&actor.id)
            .await
            .map_err(|e| WorkflowError::Directory(e.to_string()))?
            .and_then(|u| u.agency);

        let mut snap = self.store.begin_snapshot().await?;
        let inserted = self
            .store
            .insert_ticket(
                &mut snap,
                NewTicket {
                    ticket_type: input.ticket_type,
                    title: title.to_string(),
                    description: description.to_string(),
                    priority: input.priority,
                    creator_id: actor.id.clone(),
                    creator_agency: agency,
                    created_at: OffsetDateTime::now_utc(),
                },
            )
            .await;
        let ticket = match inserted {
            Ok(t) => t,
            Err(e) => {
                self.store.abort_snapshot(snap).await?;
                return Err(e.into());
            }
        };
        self.store.commit_snapshot(snap).await?;
        info!(ticket = ticket.number, creator = %actor.id, "ticket created");

        let message = format!(
            "New {} ticket #{}: {}",
            ticket.ticket_type, ticket.number, ticket.title
        );
        let intents = [Role::Secretary, Role::DeputyDirector, Role::Director]
            .into_iter()
            .map(|role| {
                NotificationIntent::new(
                    Recipient::Role(role),
                    NotificationKind::NewTicket,
                    &ticket,
                    &actor.id,
                    message.clone(),
                )
            })
            .collect();
        self.notify(intents);
        Ok(ticket)
    }

    // ── Assignment ───────────────────────────────────────────────────────────

    pub async fn assign(
        &self,
        actor: &Actor,
        reference: &str,
        input: AssignTicket,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Assign, actor, Some(&ticket))?;
        if ticket.status != TicketStatus::Pending || ticket.technician_id.is_some() {
            return Err(WorkflowError::InvalidTransition(format!(
                "ticket #{} is {}; use reassign",
                ticket.number, ticket.status
            )));
        }
        let technicians = self.technicians().await?;
        policy::check_assignable(&ticket, &input.technician_id, &technicians)?;

        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Assigned;
        next.technician_id = Some(input.technician_id.clone());
        next.assigned_at = Some(next.updated_at);
        let entry = Entry::new(reason::assignment(
            input.reason.as_deref(),
            input.notes.as_deref(),
        ))
        .with(HistoryMetadata::Assignment {
            technician_id: input.technician_id.clone(),
            notes: input.notes.clone(),
        });
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        let mut tech_message = format!("Ticket #{} assigned to you: {}", next.number, next.title);
        if let Some(notes) = input.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            tech_message.push_str(&format!(" Instructions: {}", notes.trim()));
        }
        self.notify(vec![
            NotificationIntent::new(
                Recipient::User(input.technician_id.clone()),
                NotificationKind::Assignment,
                &next,
                &actor.id,
                tech_message,
            ),
            NotificationIntent::new(
                Recipient::User(next.creator_id.clone()),
                NotificationKind::Assignment,
                &next,
                &actor.id,
                format!("Your ticket #{} has been assigned to a technician", next.number),
            ),
        ]);
        Ok(next)
    }

    pub async fn reassign(
        &self,
        actor: &Actor,
        reference: &str,
        input: AssignTicket,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Reassign, actor, Some(&ticket))?;
        Self::require_status(
            &ticket,
            &[TicketStatus::Assigned, TicketStatus::InProgress],
            Operation::Reassign,
        )?;
        let previous = ticket.technician_id.clone().ok_or_else(|| {
            WorkflowError::InvalidTransition(format!("ticket #{} has no assignee", ticket.number))
        })?;
        if previous == input.technician_id {
            return Err(WorkflowError::Validation(format!(
                "ticket #{} is already assigned to {}",
                ticket.number, previous
            )));
        }
        let technicians = self.technicians().await?;
        policy::check_assignable(&ticket, &input.technician_id, &technicians)?;

        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Assigned;
        next.technician_id = Some(input.technician_id.clone());
        next.assigned_at = Some(next.updated_at);
        let entry = Entry::text(reason::reassignment(
            &previous,
            &input.technician_id,
            input.reason.as_deref(),
        ))
        .with(HistoryMetadata::Reassignment {
            from: previous.clone(),
            to: input.technician_id.clone(),
        });
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        self.notify(vec![
            NotificationIntent::new(
                Recipient::User(input.technician_id.clone()),
                NotificationKind::Assignment,
                &next,
                &actor.id,
                format!("Ticket #{} reassigned to you: {}", next.number, next.title),
            ),
            NotificationIntent::new(
                Recipient::User(previous),
                NotificationKind::Reassignment,
                &next,
                &actor.id,
                format!("Ticket #{} has been reassigned to another technician", next.number),
            ),
            NotificationIntent::new(
                Recipient::User(next.creator_id.clone()),
                NotificationKind::Reassignment,
                &next,
                &actor.id,
                format!("Your ticket #{} has been reassigned", next.number),
            ),
        ]);
        Ok(next)
    }

    pub async fn accept_assignment(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::AcceptAssignment, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Assigned], Operation::AcceptAssignment)?;
        let next = Self::touched(&ticket);
        let entry = Entry::text(reason::accepted()).with(HistoryMetadata::AssignmentAccepted);
        self.commit(&actor.id, &ticket, next, Some(entry)).await
    }

    /// The assignee hands the ticket back; it returns to `Pending`.
    pub async fn decline_assignment(
        &self,
        actor: &Actor,
        reference: &str,
        decline_reason: Option<String>,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::DeclineAssignment, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Assigned], Operation::DeclineAssignment)?;
        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Pending;
        next.technician_id = None;
        next.assigned_at = None;
        let entry = Entry::text(reason::declined(decline_reason.as_deref())).with(
            HistoryMetadata::AssignmentDeclined {
                technician_id: actor.id.clone(),
            },
        );
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        let recipient = match &next.secretary_id {
            Some(deputy) => Recipient::User(deputy.clone()),
            None => Recipient::Role(Role::Secretary),
        };
        self.notify(vec![NotificationIntent::new(
            recipient,
            NotificationKind::AssignmentDeclined,
            &next,
            &actor.id,
            format!(
                "Technician {} declined ticket #{}; it needs a new assignee",
                actor.id, next.number
            ),
        )]);
        Ok(next)
    }

    // ── Priority ─────────────────────────────────────────────────────────────

    /// Raise priority one level. At `Critical` the ticket is returned
    /// unchanged and nothing is recorded.
    pub async fn escalate(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Escalate, actor, Some(&ticket))?;
        if ticket.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition(format!(
                "ticket #{} is closed",
                ticket.number
            )));
        }
        let to = ticket.priority.escalated();
        if to == ticket.priority {
            debug!(ticket = ticket.number, "already at highest priority");
            return Ok(ticket);
        }
        let mut next = Self::touched(&ticket);
        next.priority = to;
        let entry = Entry::text(reason::escalation(ticket.priority, to)).with(
            HistoryMetadata::Escalation {
                from: ticket.priority,
                to,
            },
        );
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        let message = format!(
            "Ticket #{} escalated from {} to {}: {}",
            next.number, ticket.priority, to, next.title
        );
        let mut recipients = vec![
            Recipient::Role(Role::Director),
            Recipient::Role(Role::DeputyDirector),
            Recipient::User(next.creator_id.clone()),
        ];
        if let Some(tech) = &next.technician_id {
            recipients.push(Recipient::User(tech.clone()));
        }
        let intents = recipients
            .into_iter()
            .map(|r| {
                NotificationIntent::new(
                    r,
                    NotificationKind::Escalation,
                    &next,
                    &actor.id,
                    message.clone(),
                )
            })
            .collect();
        self.notify(intents);
        Ok(next)
    }

    // ── Work ─────────────────────────────────────────────────────────────────

    pub async fn mark_in_progress(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::MarkInProgress, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Assigned], Operation::MarkInProgress)?;
        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::InProgress;
        self.commit(&actor.id, &ticket, next, Some(Entry::new(None)))
            .await
    }

    pub async fn mark_resolved(
        &self,
        actor: &Actor,
        reference: &str,
        summary: Option<String>,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::MarkResolved, actor, Some(&ticket))?;
        Self::require_status(
            &ticket,
            &[TicketStatus::Assigned, TicketStatus::InProgress],
            Operation::MarkResolved,
        )?;
        let summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Resolved;
        next.resolved_at = Some(next.updated_at);
        next.resolved_by = Some(actor.id.clone());
        next.resolution_summary = summary.clone();
        next.reminders_sent = 0;
        let entry = Entry::text(reason::resolution(summary.as_deref()));
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        self.notify(vec![NotificationIntent::new(
            Recipient::User(next.creator_id.clone()),
            NotificationKind::Resolution,
            &next,
            &actor.id,
            format!(
                "Ticket #{} has been resolved. Please confirm the fix or reject it with a reason.",
                next.number
            ),
        )]);
        Ok(next)
    }

    // ── Closure ──────────────────────────────────────────────────────────────

    /// The creator confirms the fix (`Closed`) or rejects it with a
    /// mandatory motive (`Rejected`).
    pub async fn validate(
        &self,
        actor: &Actor,
        reference: &str,
        input: Validation,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Validate, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Resolved], Operation::Validate)?;
        let technician = ticket.technician_id.clone();

        let mut next = Self::touched(&ticket);
        next.technician_id = None;
        let (entry, intent) = if input.validated {
            next.status = TicketStatus::Closed;
            next.closed_at = Some(next.updated_at);
            (
                Entry::text(reason::validated()),
                technician.map(|tech| {
                    (
                        tech,
                        NotificationKind::Closed,
                        format!("Ticket #{} was validated by its creator and closed", ticket.number),
                    )
                }),
            )
        } else {
            let motive = input
                .rejection_reason
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| {
                    WorkflowError::Validation("a rejection requires a reason".into())
                })?
                .to_string();
            next.status = TicketStatus::Rejected;
            (
                Entry::text(reason::rejected(&motive)).with(HistoryMetadata::Rejection {
                    motive: motive.clone(),
                }),
                technician.map(|tech| {
                    (
                        tech,
                        NotificationKind::Rejected,
                        format!(
                            "The resolution of ticket #{} was rejected. Reason: {}",
                            ticket.number, motive
                        ),
                    )
                }),
            )
        };
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        if let Some((tech, kind, message)) = intent {
            self.notify(vec![NotificationIntent::new(
                Recipient::User(tech),
                kind,
                &next,
                &actor.id,
                message,
            )]);
        }
        Ok(next)
    }

    /// Administrative closure of a resolved ticket.
    pub async fn close(&self, actor: &Actor, reference: &str) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Close, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Resolved], Operation::Close)?;
        let technician = ticket.technician_id.clone();
        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Closed;
        next.closed_at = Some(next.updated_at);
        next.technician_id = None;
        let entry = Entry::text(format!("Closed by {}", actor.id));
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        let message = format!("Ticket #{} has been closed", next.number);
        let mut intents = vec![NotificationIntent::new(
            Recipient::User(next.creator_id.clone()),
            NotificationKind::Closed,
            &next,
            &actor.id,
            message.clone(),
        )];
        if let Some(tech) = technician {
            intents.push(NotificationIntent::new(
                Recipient::User(tech),
                NotificationKind::Closed,
                &next,
                &actor.id,
                message,
            ));
        }
        self.notify(intents);
        Ok(next)
    }

    /// Generic status update, dispatched to the dedicated transition.
    pub async fn set_status(
        &self,
        actor: &Actor,
        reference: &str,
        status: TicketStatus,
        summary: Option<String>,
    ) -> Result<TicketRecord, WorkflowError> {
        match status {
            TicketStatus::InProgress => self.mark_in_progress(actor, reference).await,
            TicketStatus::Resolved => self.mark_resolved(actor, reference, summary).await,
            TicketStatus::Closed => self.close(actor, reference).await,
            other => Err(WorkflowError::InvalidTransition(format!(
                "status {} cannot be set directly",
                other
            ))),
        }
    }

    /// Send a rejected ticket back to work with a (possibly new) technician.
    pub async fn reopen(
        &self,
        actor: &Actor,
        reference: &str,
        input: AssignTicket,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Reopen, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Rejected], Operation::Reopen)?;
        let technicians = self.technicians().await?;
        policy::check_assignable(&ticket, &input.technician_id, &technicians)?;
        let motive = self.rejection_motive_of(&ticket.id).await?;

        let mut next = Self::touched(&ticket);
        next.status = TicketStatus::Assigned;
        next.technician_id = Some(input.technician_id.clone());
        next.assigned_at = Some(next.updated_at);
        next.resolved_at = None;
        next.resolved_by = None;
        next.resolution_summary = None;
        next.closed_at = None;
        next.auto_closed_at = None;
        next.reminders_sent = 0;
        let entry = Entry::text(reason::reopened(input.reason.as_deref())).with(
            HistoryMetadata::Reopen {
                technician_id: input.technician_id.clone(),
            },
        );
        let next = self.commit(&actor.id, &ticket, next, Some(entry)).await?;

        self.notify(vec![
            NotificationIntent::new(
                Recipient::User(input.technician_id.clone()),
                NotificationKind::Reopened,
                &next,
                &actor.id,
                format!(
                    "Ticket #{} was reopened and assigned to you. Rejection reason: {}",
                    next.number, motive
                ),
            ),
            NotificationIntent::new(
                Recipient::User(next.creator_id.clone()),
                NotificationKind::Reopened,
                &next,
                &actor.id,
                format!("Your ticket #{} has been reopened", next.number),
            ),
        ]);
        Ok(next)
    }

    /// Record the creator's satisfaction score. Allowed once, on closed
    /// tickets. Resubmitting the recorded score is a no-op.
    pub async fn submit_feedback(
        &self,
        actor: &Actor,
        reference: &str,
        input: Feedback,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::SubmitFeedback, actor, Some(&ticket))?;
        Self::require_status(&ticket, &[TicketStatus::Closed], Operation::SubmitFeedback)?;
        let score = u8::try_from(input.score)
            .ok()
            .filter(|s| (1..=5).contains(s))
            .ok_or_else(|| {
                WorkflowError::Validation(format!("feedback score {} outside 1..=5", input.score))
            })?;
        match ticket.feedback_score {
            Some(recorded) if recorded == score => return Ok(ticket),
            Some(_) => {
                return Err(WorkflowError::InvalidTransition(format!(
                    "feedback for ticket #{} was already submitted",
                    ticket.number
                )))
            }
            None => {}
        }
        let mut next = Self::touched(&ticket);
        next.feedback_score = Some(score);
        next.feedback_comment = input
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.commit(&actor.id, &ticket, next, None).await
    }

    // ── Comments ─────────────────────────────────────────────────────────────

    pub async fn add_comment(
        &self,
        actor: &Actor,
        reference: &str,
        content: &str,
        kind: Option<CommentKind>,
    ) -> Result<CommentRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Comment, actor, Some(&ticket))?;
        let content = content.trim();
        if content.is_empty() {
            return Err(WorkflowError::Validation("comment must not be empty".into()));
        }
        let kind = kind.unwrap_or(match actor.role {
            Role::User => CommentKind::User,
            _ => CommentKind::Technical,
        });
        let comment = CommentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket.id.clone(),
            user_id: actor.id.clone(),
            content: content.to_string(),
            kind,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut snap = self.store.begin_snapshot().await?;
        if let Err(e) = self.store.insert_comment(&mut snap, comment.clone()).await {
            self.store.abort_snapshot(snap).await?;
            return Err(e.into());
        }
        self.store.commit_snapshot(snap).await?;
        debug!(ticket = ticket.number, author = %actor.id, "comment added");
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<Vec<CommentRecord>, WorkflowError> {
        let ticket = self.load(reference).await?;
        Self::require_readable(actor, &ticket)?;
        Ok(self.store.list_comments(&ticket.id).await?)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn get_ticket(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<TicketRecord, WorkflowError> {
        let ticket = self.load(reference).await?;
        Self::require_readable(actor, &ticket)?;
        Ok(ticket)
    }

    pub async fn get_history(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<Vec<HistoryRecord>, WorkflowError> {
        let ticket = self.load(reference).await?;
        Self::require_readable(actor, &ticket)?;
        Ok(self.store.list_history(&ticket.id).await?)
    }

    /// Motive of the most recent rejection, or the "reason unavailable"
    /// sentinel.
    pub async fn rejection_motive(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<String, WorkflowError> {
        let ticket = self.load(reference).await?;
        Self::require_readable(actor, &ticket)?;
        self.rejection_motive_of(&ticket.id).await
    }

    async fn rejection_motive_of(&self, ticket_id: &str) -> Result<String, WorkflowError> {
        let history = self.store.list_history(ticket_id).await?;
        Ok(reason::rejection_motive(&history))
    }

    pub async fn list_tickets(
        &self,
        actor: &Actor,
        query: TicketQuery,
    ) -> Result<Vec<TicketRecord>, WorkflowError> {
        let mut filter = TicketFilter {
            status: query.status,
            ticket_type: query.ticket_type,
            priority: query.priority,
            ..TicketFilter::default()
        };
        match query.scope {
            Scope::Mine => filter.creator_id = Some(actor.id.clone()),
            Scope::Assigned => filter.technician_id = Some(actor.id.clone()),
            Scope::All => permissions::authorize(Operation::ViewAll, actor, None)?,
            Scope::DelegatedToMe => {
                permissions::authorize(Operation::ViewAll, actor, None)?;
                filter.secretary_id = Some(Some(actor.id.clone()));
            }
            Scope::NotDelegated => {
                permissions::authorize(Operation::ViewAll, actor, None)?;
                filter.secretary_id = Some(None);
            }
        }
        Ok(self.store.list_tickets(&filter).await?)
    }

    /// Eligible technicians for a ticket, least loaded first.
    pub async fn candidates(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<Vec<Candidate>, WorkflowError> {
        let ticket = self.load(reference).await?;
        permissions::authorize(Operation::Assign, actor, Some(&ticket))?;
        let technicians = self.technicians().await?;
        let active = self.active_tickets().await?;
        Ok(policy::candidate_technicians(&ticket, &technicians, &active))
    }

    /// Number of tickets in `Assigned` or `InProgress` held by the technician.
    pub async fn workload(&self, technician_id: &str) -> Result<usize, WorkflowError> {
        let filter = TicketFilter {
            technician_id: Some(technician_id.to_string()),
            ..TicketFilter::default()
        };
        let tickets = self.store.list_tickets(&filter).await?;
        Ok(policy::workload(technician_id, &tickets))
    }

    async fn active_tickets(&self) -> Result<Vec<TicketRecord>, WorkflowError> {
        let mut tickets = Vec::new();
        for status in [TicketStatus::Assigned, TicketStatus::InProgress] {
            let filter = TicketFilter {
                status: Some(status),
                ..TicketFilter::default()
            };
            tickets.extend(self.store.list_tickets(&filter).await?);
        }
        Ok(tickets)
    }
}
