#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helpdesk_storage::{MemoryStore, Priority, TicketRecord, TicketType};
use helpdesk_workflow::{
    Actor, AssignTicket, CreateTicket, DelegationRegistry, NotificationEmitter,
    NotificationIntent, NotificationKind, NotifyError, Recipient, Role, StaticDirectory,
    TicketWorkflow, UserProfile,
};

/// Emitter that remembers every intent.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<NotificationIntent>>);

impl Recorder {
    pub fn take(&self) -> Vec<NotificationIntent> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn kinds_for(&self, user: &str) -> Vec<NotificationKind> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.recipient == Recipient::User(user.to_string()))
            .map(|i| i.kind)
            .collect()
    }
}

#[async_trait]
impl NotificationEmitter for Recorder {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        self.0.lock().unwrap().push(intent.clone());
        Ok(())
    }
}

/// Emitter whose every delivery fails.
pub struct Broken;

#[async_trait]
impl NotificationEmitter for Broken {
    async fn emit(&self, _intent: &NotificationIntent) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("mail relay unreachable".into()))
    }
}

/// Emitter that spends `delay` on every intent before recording it.
pub struct Slow {
    pub delay: Duration,
    pub sent: Arc<Recorder>,
}

#[async_trait]
impl NotificationEmitter for Slow {
    async fn emit(&self, intent: &NotificationIntent) -> Result<(), NotifyError> {
        tokio::time::sleep(self.delay).await;
        self.sent.emit(intent).await
    }
}

fn user(id: &str, role: Role, specialization: Option<TicketType>) -> UserProfile {
    UserProfile {
        id: id.into(),
        full_name: id.into(),
        role,
        agency: (role == Role::User).then(|| "North".to_string()),
        specialization,
        active: true,
    }
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new(vec![
        user("alice", Role::User, None),
        user("bob", Role::User, None),
        user("tina", Role::Technician, Some(TicketType::Material)),
        user("theo", Role::Technician, Some(TicketType::Applicative)),
        user("gus", Role::Technician, None),
        user("sara", Role::Secretary, None),
        user("dave", Role::DeputyDirector, None),
        user("diane", Role::Director, None),
        user("root", Role::Admin, None),
    ])
}

pub fn actor(id: &str) -> Actor {
    directory()
        .lookup(id)
        .map(UserProfile::actor)
        .unwrap_or_else(|| panic!("unknown fixture user {}", id))
}

pub struct Desk {
    pub workflow: TicketWorkflow<MemoryStore>,
    pub delegation: DelegationRegistry<MemoryStore>,
    pub sent: Arc<Recorder>,
}

impl Desk {
    /// The recorder, once every queued notification has reached it.
    pub async fn delivered(&self) -> &Recorder {
        self.workflow.flush_notifications().await;
        &self.sent
    }
}

pub fn desk() -> Desk {
    let sent = Arc::new(Recorder::default());
    desk_with(sent.clone(), sent)
}

pub fn desk_with(emitter: Arc<dyn NotificationEmitter>, sent: Arc<Recorder>) -> Desk {
    let store = Arc::new(MemoryStore::new());
    let dir = Arc::new(directory());
    Desk {
        workflow: TicketWorkflow::new(store.clone(), dir.clone(), dir.clone(), emitter),
        delegation: DelegationRegistry::new(store, dir),
        sent,
    }
}

pub fn printer_ticket() -> CreateTicket {
    CreateTicket {
        title: "Printer jammed".into(),
        description: "Paper stuck in tray 2 on floor 3".into(),
        ticket_type: TicketType::Material,
        priority: Priority::Low,
    }
}

pub fn to(technician: &str) -> AssignTicket {
    AssignTicket {
        technician_id: technician.into(),
        ..AssignTicket::default()
    }
}

/// alice's printer ticket, assigned to tina by sara and marked resolved.
pub async fn resolved_ticket(desk: &Desk) -> TicketRecord {
    let wf = &desk.workflow;
    let t = wf.create(&actor("alice"), printer_ticket()).await.unwrap();
    wf.assign(&actor("sara"), &t.id, to("tina")).await.unwrap();
    wf.mark_resolved(&actor("tina"), &t.id, Some("Cleared the feeder".into()))
        .await
        .unwrap()
}
