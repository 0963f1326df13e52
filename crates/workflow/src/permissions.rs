//! Who may trigger which operation.
//!
//! The table is static data: each [`Operation`] maps to one [`Gate`]. Gates
//! that depend on the ticket (`Creator`, `Assignee`) are checked against the
//! committed ticket the operation is about to modify.

use helpdesk_storage::TicketRecord;

use crate::actor::{Actor, Role};
use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Assign,
    Reassign,
    Escalate,
    Delegate,
    AcceptAssignment,
    DeclineAssignment,
    MarkInProgress,
    MarkResolved,
    Validate,
    Close,
    Reopen,
    SubmitFeedback,
    ViewAll,
    Comment,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Assign => "assign",
            Operation::Reassign => "reassign",
            Operation::Escalate => "escalate",
            Operation::Delegate => "delegate",
            Operation::AcceptAssignment => "accept_assignment",
            Operation::DeclineAssignment => "decline_assignment",
            Operation::MarkInProgress => "mark_in_progress",
            Operation::MarkResolved => "mark_resolved",
            Operation::Validate => "validate",
            Operation::Close => "close",
            Operation::Reopen => "reopen",
            Operation::SubmitFeedback => "submit_feedback",
            Operation::ViewAll => "view_all",
            Operation::Comment => "comment",
        }
    }
}

/// The condition an actor must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Roles(&'static [Role]),
    /// The actor created the ticket.
    Creator,
    /// The actor is the ticket's active technician.
    Assignee,
    /// The actor can read the ticket.
    Reader,
}

const ESCALATORS: &[Role] = &[Role::DeputyDirector, Role::Director, Role::Admin];
const DELEGATORS: &[Role] = &[Role::Director, Role::Admin];

pub fn gate(op: Operation) -> Gate {
    match op {
        Operation::Create => Gate::Roles(&[Role::User]),
        Operation::Assign
        | Operation::Reassign
        | Operation::Close
        | Operation::Reopen
        | Operation::ViewAll => Gate::Roles(Role::STAFF),
        Operation::Escalate => Gate::Roles(ESCALATORS),
        Operation::Delegate => Gate::Roles(DELEGATORS),
        Operation::AcceptAssignment
        | Operation::DeclineAssignment
        | Operation::MarkInProgress
        | Operation::MarkResolved => Gate::Assignee,
        Operation::Validate | Operation::SubmitFeedback => Gate::Creator,
        Operation::Comment => Gate::Reader,
    }
}

/// Read access: the creator, the active or resolving technician, and staff.
pub fn can_read(actor: &Actor, ticket: &TicketRecord) -> bool {
    actor.role.is_staff()
        || ticket.creator_id == actor.id
        || ticket.technician_id.as_deref() == Some(actor.id.as_str())
        || ticket.resolved_by.as_deref() == Some(actor.id.as_str())
}

/// Check `actor` against the gate of `op`.
///
/// Ticket-dependent gates fail when `ticket` is `None`.
pub fn authorize(
    op: Operation,
    actor: &Actor,
    ticket: Option<&TicketRecord>,
) -> Result<(), WorkflowError> {
    let allowed = match gate(op) {
        Gate::Roles(roles) => roles.contains(&actor.role),
        Gate::Creator => ticket.is_some_and(|t| t.creator_id == actor.id),
        Gate::Assignee => {
            ticket.is_some_and(|t| t.technician_id.as_deref() == Some(actor.id.as_str()))
        }
        Gate::Reader => ticket.is_some_and(|t| can_read(actor, t)),
    };
    if allowed {
        Ok(())
    } else {
        tracing::debug!(
            actor = %actor.id,
            role = %actor.role,
            op = op.as_str(),
            "permission denied"
        );
        Err(WorkflowError::Forbidden(format!(
            "{} ({}) may not {}",
            actor.id,
            actor.role,
            op.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_storage::{Priority, TicketStatus, TicketType};
    use time::OffsetDateTime;

    fn ticket(creator: &str, technician: Option<&str>) -> TicketRecord {
        let now = OffsetDateTime::UNIX_EPOCH;
        TicketRecord {
            id: "t-1".into(),
            number: 1,
            ticket_type: TicketType::Applicative,
            title: "ERP login".into(),
            description: "Cannot log in".into(),
            creator_id: creator.into(),
            creator_agency: None,
            created_at: now,
            priority: Priority::Low,
            status: if technician.is_some() {
                TicketStatus::Assigned
            } else {
                TicketStatus::Pending
            },
            technician_id: technician.map(str::to_string),
            secretary_id: None,
            resolved_by: None,
            resolution_summary: None,
            assigned_at: None,
            resolved_at: None,
            closed_at: None,
            auto_closed_at: None,
            feedback_score: None,
            feedback_comment: None,
            reminders_sent: 0,
            version: 0,
            updated_at: now,
        }
    }

    #[test]
    fn secretary_cannot_escalate() {
        let sec = Actor::new("s1", Role::Secretary);
        let err = authorize(Operation::Escalate, &sec, None).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
        let deputy = Actor::new("d1", Role::DeputyDirector);
        assert!(authorize(Operation::Escalate, &deputy, None).is_ok());
    }

    #[test]
    fn only_directors_delegate() {
        assert!(authorize(Operation::Delegate, &Actor::new("d", Role::Director), None).is_ok());
        assert!(authorize(Operation::Delegate, &Actor::new("a", Role::Admin), None).is_ok());
        assert!(
            authorize(Operation::Delegate, &Actor::new("dd", Role::DeputyDirector), None).is_err()
        );
    }

    #[test]
    fn only_users_create() {
        assert!(authorize(Operation::Create, &Actor::new("u", Role::User), None).is_ok());
        assert!(authorize(Operation::Create, &Actor::new("t", Role::Technician), None).is_err());
    }

    #[test]
    fn creator_gate_uses_ticket() {
        let t = ticket("u1", Some("tech1"));
        assert!(authorize(Operation::Validate, &Actor::new("u1", Role::User), Some(&t)).is_ok());
        assert!(authorize(Operation::Validate, &Actor::new("u2", Role::User), Some(&t)).is_err());
        // an admin is still not the creator
        assert!(authorize(Operation::Validate, &Actor::new("a", Role::Admin), Some(&t)).is_err());
        assert!(authorize(Operation::Validate, &Actor::new("u1", Role::User), None).is_err());
    }

    #[test]
    fn assignee_gate_uses_ticket() {
        let t = ticket("u1", Some("tech1"));
        let tech = Actor::new("tech1", Role::Technician);
        let other = Actor::new("tech2", Role::Technician);
        assert!(authorize(Operation::MarkResolved, &tech, Some(&t)).is_ok());
        assert!(authorize(Operation::MarkResolved, &other, Some(&t)).is_err());
        let pending = ticket("u1", None);
        assert!(authorize(Operation::MarkInProgress, &tech, Some(&pending)).is_err());
    }

    #[test]
    fn read_access() {
        let mut t = ticket("u1", Some("tech1"));
        assert!(can_read(&Actor::new("u1", Role::User), &t));
        assert!(can_read(&Actor::new("tech1", Role::Technician), &t));
        assert!(can_read(&Actor::new("s", Role::Secretary), &t));
        assert!(!can_read(&Actor::new("u2", Role::User), &t));
        assert!(!can_read(&Actor::new("tech2", Role::Technician), &t));

        t.technician_id = None;
        t.resolved_by = Some("tech1".into());
        assert!(can_read(&Actor::new("tech1", Role::Technician), &t));
    }
}
