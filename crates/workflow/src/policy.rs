//! Assignment policy: specialization eligibility and workload counts.
//!
//! Everything here is a pure function of its inputs. The workflow fetches
//! technicians and tickets and passes them in.

use helpdesk_storage::{TicketRecord, TicketType};
use serde::Serialize;

use crate::actor::TechnicianProfile;
use crate::error::WorkflowError;

/// A technician proposed for a ticket, with their current load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub full_name: String,
    pub specialization: Option<TicketType>,
    pub workload: usize,
}

/// A technician may take a ticket if they are unspecialized or their
/// specialization matches the ticket type.
pub fn is_eligible(ticket_type: TicketType, specialization: Option<TicketType>) -> bool {
    specialization.is_none_or(|s| s == ticket_type)
}

/// Number of tickets in `tickets` actively assigned to `technician_id`.
pub fn workload(technician_id: &str, tickets: &[TicketRecord]) -> usize {
    tickets
        .iter()
        .filter(|t| {
            t.status.is_active_work() && t.technician_id.as_deref() == Some(technician_id)
        })
        .count()
}

/// Eligible technicians for `ticket`, least loaded first. Ties keep directory order.
pub fn candidate_technicians(
    ticket: &TicketRecord,
    technicians: &[TechnicianProfile],
    tickets: &[TicketRecord],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = technicians
        .iter()
        .filter(|t| is_eligible(ticket.ticket_type, t.specialization))
        .map(|t| Candidate {
            id: t.id.clone(),
            full_name: t.full_name.clone(),
            specialization: t.specialization,
            workload: workload(&t.id, tickets),
        })
        .collect();
    candidates.sort_by_key(|c| c.workload);
    candidates
}

/// Resolve `technician_id` among `technicians` and check it may take `ticket`.
pub fn check_assignable<'a>(
    ticket: &TicketRecord,
    technician_id: &str,
    technicians: &'a [TechnicianProfile],
) -> Result<&'a TechnicianProfile, WorkflowError> {
    let tech = technicians
        .iter()
        .find(|t| t.id == technician_id)
        .ok_or_else(|| WorkflowError::not_found(format!("technician {}", technician_id)))?;
    if !is_eligible(ticket.ticket_type, tech.specialization) {
        return Err(WorkflowError::Validation(format!(
            "technician {} specializes in {} tickets, ticket #{} is {}",
            technician_id,
            tech.specialization.map_or("any", TicketType::as_str),
            ticket.number,
            ticket.ticket_type
        )));
    }
    Ok(tech)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_storage::{Priority, TicketStatus};
    use time::OffsetDateTime;

    fn tech(id: &str, spec: Option<TicketType>) -> TechnicianProfile {
        TechnicianProfile {
            id: id.into(),
            full_name: id.into(),
            specialization: spec,
        }
    }

    fn ticket(number: i64, ty: TicketType, status: TicketStatus, tech: Option<&str>) -> TicketRecord {
        let now = OffsetDateTime::UNIX_EPOCH;
        TicketRecord {
            id: format!("t-{}", number),
            number,
            ticket_type: ty,
            title: "t".into(),
            description: "d".into(),
            creator_id: "u".into(),
            creator_agency: None,
            created_at: now,
            priority: Priority::Medium,
            status,
            technician_id: tech.map(str::to_string),
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
    fn eligibility() {
        assert!(is_eligible(TicketType::Material, None));
        assert!(is_eligible(TicketType::Material, Some(TicketType::Material)));
        assert!(!is_eligible(TicketType::Material, Some(TicketType::Applicative)));
    }

    #[test]
    fn workload_counts_only_active_work() {
        let tickets = vec![
            ticket(1, TicketType::Material, TicketStatus::Assigned, Some("a")),
            ticket(2, TicketType::Material, TicketStatus::InProgress, Some("a")),
            ticket(3, TicketType::Material, TicketStatus::Resolved, Some("a")),
            ticket(4, TicketType::Material, TicketStatus::Assigned, Some("b")),
        ];
        assert_eq!(workload("a", &tickets), 2);
        assert_eq!(workload("b", &tickets), 1);
        assert_eq!(workload("c", &tickets), 0);
    }

    #[test]
    fn candidates_filtered_and_sorted_by_load() {
        let target = ticket(9, TicketType::Applicative, TicketStatus::Pending, None);
        let techs = vec![
            tech("busy", Some(TicketType::Applicative)),
            tech("hw", Some(TicketType::Material)),
            tech("generalist", None),
        ];
        let tickets = vec![ticket(1, TicketType::Applicative, TicketStatus::Assigned, Some("busy"))];
        let ids: Vec<_> = candidate_technicians(&target, &techs, &tickets)
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["generalist", "busy"]);
    }

    #[test]
    fn check_assignable_errors() {
        let target = ticket(9, TicketType::Material, TicketStatus::Pending, None);
        let techs = vec![tech("sw", Some(TicketType::Applicative))];
        assert!(matches!(
            check_assignable(&target, "ghost", &techs),
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(matches!(
            check_assignable(&target, "sw", &techs),
            Err(WorkflowError::Validation(_))
        ));
    }
}
