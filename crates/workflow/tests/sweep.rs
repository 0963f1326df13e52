//! Reminder and auto-close sweep over resolved tickets.

mod support;

use helpdesk_storage::{HistoryMetadata, TicketStatus};
use helpdesk_workflow::{Feedback, NotificationKind, SweepConfig, Validation};
use support::{actor, desk, printer_ticket, resolved_ticket, to};
use time::{Duration, OffsetDateTime};

#[tokio::test]
async fn reminders_then_auto_close() {
    let desk = desk();
    let wf = &desk.workflow;
    let t = resolved_ticket(&desk).await;
    let resolved_at = t.resolved_at.unwrap();
    let cfg = SweepConfig::default();
    desk.delivered().await.take();

    let report = wf.sweep(&cfg, resolved_at + Duration::days(1)).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.reminders_sent, 0);

    let report = wf.sweep(&cfg, resolved_at + Duration::days(4)).await.unwrap();
    assert_eq!(report.reminders_sent, 1);
    // second run on the same day sends nothing new
    let report = wf.sweep(&cfg, resolved_at + Duration::days(4)).await.unwrap();
    assert_eq!(report.reminders_sent, 0);

    wf.sweep(&cfg, resolved_at + Duration::days(7)).await.unwrap();
    wf.sweep(&cfg, resolved_at + Duration::days(11)).await.unwrap();
    assert_eq!(
        desk.delivered().await.kinds_for("alice"),
        vec![
            NotificationKind::ValidationReminder(1),
            NotificationKind::ValidationReminder(2),
            NotificationKind::ValidationReminder(3),
        ]
    );
    let history_before = wf.get_history(&actor("alice"), &t.id).await.unwrap().len();

    let report = wf.sweep(&cfg, resolved_at + Duration::days(14)).await.unwrap();
    assert_eq!(report.auto_closed, 1);

    let closed = wf.get_ticket(&actor("alice"), &t.id).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    assert_eq!(closed.technician_id, None);
    assert!(closed.auto_closed_at.is_some());
    assert_eq!(closed.closed_at, closed.auto_closed_at);

    let history = wf.get_history(&actor("alice"), &t.id).await.unwrap();
    // reminders write no history, auto-close writes one entry
    assert_eq!(history.len(), history_before + 1);
    let last = history.last().unwrap();
    assert_eq!(last.user_id, "alice");
    assert_eq!(last.old_status, Some(TicketStatus::Resolved));
    assert_eq!(last.metadata, Some(HistoryMetadata::AutoClose));
    assert!(desk.delivered().await.kinds_for("alice").contains(&NotificationKind::AutoClosed));
    assert!(desk.delivered().await.kinds_for("tina").contains(&NotificationKind::Closed));

    // the creator may still rate an auto-closed ticket
    let rated = wf
        .submit_feedback(
            &actor("alice"),
            &t.id,
            Feedback {
                score: 3,
                comment: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(rated.feedback_score, Some(3));
}

#[tokio::test]
async fn long_idle_ticket_closes_without_reminders() {
    let desk = desk();
    let t = resolved_ticket(&desk).await;
    desk.delivered().await.take();
    let now = t.resolved_at.unwrap() + Duration::days(30);
    let report = desk
        .workflow
        .sweep(&SweepConfig::default(), now)
        .await
        .unwrap();
    assert_eq!(report.reminders_sent, 0);
    assert_eq!(report.auto_closed, 1);
    assert_eq!(
        desk.delivered().await.kinds_for("alice"),
        vec![NotificationKind::AutoClosed]
    );
}

#[tokio::test]
async fn only_resolved_tickets_are_swept() {
    let desk = desk();
    let wf = &desk.workflow;
    let pending = wf.create(&actor("alice"), printer_ticket()).await.unwrap();
    let assigned = wf.create(&actor("bob"), printer_ticket()).await.unwrap();
    wf.assign(&actor("sara"), &assigned.id, to("gus")).await.unwrap();
    let validated = resolved_ticket(&desk).await;
    wf.validate(
        &actor("alice"),
        &validated.id,
        Validation {
            validated: true,
            rejection_reason: None,
        },
    )
    .await
    .unwrap();

    let now = OffsetDateTime::now_utc() + Duration::days(60);
    let report = wf.sweep(&SweepConfig::default(), now).await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(report.auto_closed, 0);

    let p = wf.get_ticket(&actor("alice"), &pending.id).await.unwrap();
    assert_eq!(p.status, TicketStatus::Pending);
    let v = wf.get_ticket(&actor("alice"), &validated.id).await.unwrap();
    assert_eq!(v.auto_closed_at, None);
}

#[tokio::test]
async fn reopened_ticket_restarts_reminder_count() {
    let desk = desk();
    let wf = &desk.workflow;
    let cfg = SweepConfig::default();
    let t = resolved_ticket(&desk).await;
    wf.sweep(&cfg, t.resolved_at.unwrap() + Duration::days(5))
        .await
        .unwrap();
    assert_eq!(
        wf.get_ticket(&actor("alice"), &t.id).await.unwrap().reminders_sent,
        1
    );

    wf.validate(
        &actor("alice"),
        &t.id,
        Validation {
            validated: false,
            rejection_reason: Some("noise persists".into()),
        },
    )
    .await
    .unwrap();
    let t = wf.reopen(&actor("sara"), &t.id, to("tina")).await.unwrap();
    assert_eq!(t.reminders_sent, 0);
}
