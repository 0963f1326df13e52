//! Notification intents and emitters.
//!
//! The workflow produces [`NotificationIntent`]s after a transition commits
//! and queues them on a [`Notifier`]. A background task hands them to the
//! [`NotificationEmitter`], so a slow webhook never holds up the request that
//! caused the notification. Delivery failures are logged and never undo the
//! transition.

use std::sync::Arc;

use async_trait::async_trait;
use helpdesk_storage::TicketRecord;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::actor::Role;

/// Who should receive a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    User(String),
    /// Everyone holding the role; the emitter resolves members.
    Role(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewTicket,
    Assignment,
    Reassignment,
    Escalation,
    Resolution,
    Closed,
    Rejected,
    Reopened,
    AssignmentDeclined,
    /// The n-th reminder (1-based) to validate a resolved ticket.
    ValidationReminder(u8),
    AutoClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationIntent {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub ticket_id: String,
    pub ticket_number: i64,
    pub actor_id: String,
    pub message: String,
}

impl NotificationIntent {
    pub fn new(
        recipient: Recipient,
        kind: NotificationKind,
        ticket: &TicketRecord,
        actor_id: &str,
        message: impl Into<String>,
    ) -> Self {
        NotificationIntent {
            recipient,
            kind,
            ticket_id: ticket.id.clone(),
            ticket_number: ticket.number,
            actor_id: actor_id.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Sink for notification intents.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError>;
}

/// Writes each intent to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmitter;

#[async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        info!(
            recipient = ?intent.recipient,
            kind = ?intent.kind,
            ticket = intent.ticket_number,
            "{}",
            intent.message
        );
        Ok(())
    }
}

/// Sends every intent to each inner emitter. Fails if any of them failed,
/// after trying all.
#[derive(Clone, Default)]
pub struct FanoutEmitter {
    emitters: Vec<Arc<dyn NotificationEmitter>>,
}

impl FanoutEmitter {
    pub fn new(emitters: Vec<Arc<dyn NotificationEmitter>>) -> Self {
        FanoutEmitter { emitters }
    }

    pub fn push(&mut self, emitter: Arc<dyn NotificationEmitter>) {
        self.emitters.push(emitter);
    }
}

#[async_trait]
impl NotificationEmitter for FanoutEmitter {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for emitter in &self.emitters {
            if let Err(e) = emitter.emit(intent).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(failures.join("; ")))
        }
    }
}

/// Emit all intents, logging failures instead of returning them.
pub(crate) async fn dispatch(emitter: &dyn NotificationEmitter, intents: Vec<NotificationIntent>) {
    for intent in intents {
        if let Err(e) = emitter.emit(&intent).await {
            warn!(
                ticket = intent.ticket_number,
                kind = ?intent.kind,
                error = %e,
                "notification not delivered"
            );
        }
    }
}

/// Pending deliveries before new intents are dropped.
pub const QUEUE_CAPACITY: usize = 1024;

enum Job {
    Deliver(Vec<NotificationIntent>),
    Flush(oneshot::Sender<()>),
}

/// Queue in front of an emitter, drained by one background task.
///
/// Clones share the queue. The task ends once every clone is dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Job>,
}

impl Notifier {
    /// Spawn the delivery task. Must be called within a Tokio runtime.
    pub fn spawn(emitter: Arc<dyn NotificationEmitter>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Deliver(intents) => dispatch(emitter.as_ref(), intents).await,
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("notification queue closed");
        });
        Notifier { tx }
    }

    /// Queue intents without waiting for delivery.
    pub fn enqueue(&self, intents: Vec<NotificationIntent>) {
        if intents.is_empty() {
            return;
        }
        match self.tx.try_send(Job::Deliver(intents)) {
            Ok(()) => {}
            Err(TrySendError::Full(Job::Deliver(dropped))) => {
                warn!(dropped = dropped.len(), "notification queue full, intents dropped");
            }
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => {
                warn!("notification task is gone, intents dropped");
            }
        }
    }

    /// Wait until everything queued before this call has been handed to the
    /// emitter.
    pub async fn flush(&self) {
        let (done, delivered) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).await.is_ok() {
            let _ = delivered.await;
        }
    }
}
