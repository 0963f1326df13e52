//! Periodic maintenance of resolved tickets: validation reminders and
//! automatic closure.

use helpdesk_storage::{HistoryMetadata, TicketFilter, TicketRecord, TicketStatus, TicketStore};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::notify::{NotificationIntent, NotificationKind, Recipient};
use crate::reason;
use crate::workflow::{Entry, TicketWorkflow};

/// Actor id recorded on sweep-driven notifications and logs.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Days after resolution at which each reminder is due, ascending.
    pub reminder_days: Vec<i64>,
    pub auto_close_days: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            reminder_days: vec![3, 7, 10],
            auto_close_days: 14,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub reminders_sent: usize,
    pub auto_closed: usize,
    /// Tickets skipped because a user acted on them concurrently.
    pub conflicts: usize,
}

enum Due {
    Nothing,
    Reminder(u8),
    AutoClose,
}

fn due(ticket: &TicketRecord, config: &SweepConfig, now: OffsetDateTime) -> Due {
    let since = ticket.resolved_at.unwrap_or(ticket.updated_at);
    let days = (now - since).whole_days();
    if days >= config.auto_close_days {
        return Due::AutoClose;
    }
    let sent = usize::from(ticket.reminders_sent);
    match config.reminder_days.get(sent) {
        Some(&threshold) if days >= threshold => Due::Reminder(ticket.reminders_sent + 1),
        _ => Due::Nothing,
    }
}

impl<S: TicketStore> TicketWorkflow<S> {
    /// Examine every resolved ticket once. At most one reminder per ticket
    /// per run; auto-closure wins over a pending reminder.
    ///
    /// A ticket validated or rejected while the sweep runs makes the sweep's
    /// write conflict; it is counted and left alone.
    pub async fn sweep(
        &self,
        config: &SweepConfig,
        now: OffsetDateTime,
    ) -> Result<SweepReport, WorkflowError> {
        let filter = TicketFilter {
            status: Some(TicketStatus::Resolved),
            ..TicketFilter::default()
        };
        let resolved = self.store().list_tickets(&filter).await?;
        let mut report = SweepReport {
            examined: resolved.len(),
            ..SweepReport::default()
        };
        for ticket in resolved {
            let outcome = match due(&ticket, config, now) {
                Due::Nothing => continue,
                Due::Reminder(n) => self.send_reminder(&ticket, n, now).await.map(|_| {
                    report.reminders_sent += 1;
                }),
                Due::AutoClose => self
                    .auto_close(&ticket, config.auto_close_days, now)
                    .await
                    .map(|_| {
                        report.auto_closed += 1;
                    }),
            };
            match outcome {
                Ok(()) => {}
                Err(WorkflowError::Conflict { .. }) => {
                    warn!(ticket = ticket.number, "ticket changed during sweep; skipped");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            examined = report.examined,
            reminders = report.reminders_sent,
            auto_closed = report.auto_closed,
            conflicts = report.conflicts,
            "sweep finished"
        );
        Ok(report)
    }

    async fn send_reminder(
        &self,
        ticket: &TicketRecord,
        n: u8,
        now: OffsetDateTime,
    ) -> Result<(), WorkflowError> {
        let mut next = ticket.clone();
        next.reminders_sent = n;
        next.updated_at = now;
        let next = self.commit(SYSTEM_ACTOR, ticket, next, None).await?;
        self.notify(vec![NotificationIntent::new(
            Recipient::User(next.creator_id.clone()),
            NotificationKind::ValidationReminder(n),
            &next,
            SYSTEM_ACTOR,
            format!(
                "Reminder {}: ticket #{} was resolved and awaits your validation",
                n, next.number
            ),
        )]);
        Ok(())
    }

    async fn auto_close(
        &self,
        ticket: &TicketRecord,
        days: i64,
        now: OffsetDateTime,
    ) -> Result<(), WorkflowError> {
        let technician = ticket.technician_id.clone();
        let mut next = ticket.clone();
        next.status = TicketStatus::Closed;
        next.technician_id = None;
        next.closed_at = Some(now);
        next.auto_closed_at = Some(now);
        next.updated_at = now;
        let mut entry = Entry::text(reason::auto_closed(days)).with(HistoryMetadata::AutoClose);
        entry.user_id = Some(ticket.creator_id.clone());
        let next = self.commit(SYSTEM_ACTOR, ticket, next, Some(entry)).await?;

        let mut intents = vec![NotificationIntent::new(
            Recipient::User(next.creator_id.clone()),
            NotificationKind::AutoClosed,
            &next,
            SYSTEM_ACTOR,
            format!(
                "Ticket #{} was closed automatically after {} days without validation",
                next.number, days
            ),
        )];
        if let Some(tech) = technician {
            intents.push(NotificationIntent::new(
                Recipient::User(tech),
                NotificationKind::Closed,
                &next,
                SYSTEM_ACTOR,
                format!("Ticket #{} was closed automatically", next.number),
            ));
        }
        self.notify(intents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_storage::{Priority, TicketType};
    use time::Duration;

    fn resolved(days_ago: i64, reminders_sent: u8, now: OffsetDateTime) -> TicketRecord {
        let at = now - Duration::days(days_ago);
        TicketRecord {
            id: "t".into(),
            number: 1,
            ticket_type: TicketType::Material,
            title: "t".into(),
            description: "d".into(),
            creator_id: "u".into(),
            creator_agency: None,
            created_at: at,
            priority: Priority::Low,
            status: TicketStatus::Resolved,
            technician_id: Some("tech".into()),
            secretary_id: None,
            resolved_by: Some("tech".into()),
            resolution_summary: None,
            assigned_at: Some(at),
            resolved_at: Some(at),
            closed_at: None,
            auto_closed_at: None,
            feedback_score: None,
            feedback_comment: None,
            reminders_sent,
            version: 3,
            updated_at: at,
        }
    }

    #[test]
    fn due_schedule() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::days(100);
        let cfg = SweepConfig::default();
        assert!(matches!(due(&resolved(1, 0, now), &cfg, now), Due::Nothing));
        assert!(matches!(due(&resolved(3, 0, now), &cfg, now), Due::Reminder(1)));
        assert!(matches!(due(&resolved(5, 1, now), &cfg, now), Due::Nothing));
        assert!(matches!(due(&resolved(8, 1, now), &cfg, now), Due::Reminder(2)));
        assert!(matches!(due(&resolved(12, 3, now), &cfg, now), Due::Nothing));
        assert!(matches!(due(&resolved(14, 1, now), &cfg, now), Due::AutoClose));
    }
}
