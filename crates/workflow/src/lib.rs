//! Ticket lifecycle for the IT support desk.
//!
//! [`TicketWorkflow`] is the only writer of ticket status and history. It
//! checks the role-based permission table ([`permissions`]), consults the
//! assignment policy ([`policy`]) and user directory ([`directory`]), commits
//! through a [`helpdesk_storage::TicketStore`], and queues
//! [`notify::NotificationIntent`]s for background delivery once a change is
//! durable.
//!
//! Concurrency is optimistic: every write is conditioned on the ticket version
//! the operation read. When two operations race on one ticket, exactly one
//! commits and the other fails with [`WorkflowError::Conflict`] without
//! side effects.

pub mod actor;
pub mod delegation;
pub mod directory;
pub mod error;
pub mod notify;
pub mod permissions;
pub mod policy;
pub mod reason;
pub mod sweep;
pub mod workflow;

pub use actor::{Actor, Role, TechnicianProfile, UserProfile};
pub use delegation::{is_delegated_to, DelegationRegistry};
pub use directory::{DirectoryError, StaticDirectory, TechnicianDirectory, UserDirectory};
pub use error::WorkflowError;
pub use notify::{
    FanoutEmitter, LogEmitter, NotificationEmitter, NotificationIntent, NotificationKind,
    Notifier, NotifyError, Recipient,
};
pub use permissions::{authorize, can_read, Gate, Operation};
pub use policy::Candidate;
pub use reason::REASON_UNAVAILABLE;
pub use sweep::{SweepConfig, SweepReport, SYSTEM_ACTOR};
pub use workflow::{
    AssignTicket, CreateTicket, Feedback, Scope, TicketQuery, TicketWorkflow, Validation,
};
