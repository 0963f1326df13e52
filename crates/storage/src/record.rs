use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Error returned when parsing one of the record enums from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
    Closed,
    Rejected,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 6] = [
        TicketStatus::Pending,
        TicketStatus::Assigned,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
        TicketStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Assigned => "assigned",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Rejected => "rejected",
        }
    }

    /// States in which a ticket must carry exactly one active assignee.
    pub fn requires_assignee(self) -> bool {
        matches!(
            self,
            TicketStatus::Assigned | TicketStatus::InProgress | TicketStatus::Resolved
        )
    }

    /// States that count towards a technician's workload.
    pub fn is_active_work(self) -> bool {
        matches!(self, TicketStatus::Assigned | TicketStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        self == TicketStatus::Closed
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Category of a ticket. Technicians specialize in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Material,
    Applicative,
}

impl TicketType {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketType::Material => "material",
            TicketType::Applicative => "applicative",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "material" => Ok(TicketType::Material),
            "applicative" => Ok(TicketType::Applicative),
            other => Err(ParseEnumError {
                kind: "ticket type",
                value: other.to_string(),
            }),
        }
    }
}

/// Ticket priority, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// The next level up, clamped at `Critical`.
    pub fn escalated(self) -> Priority {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High | Priority::Critical => Priority::Critical,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(ParseEnumError {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// A ticket as stored in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: String,
    /// Sequential human-facing number, unique and never reused.
    pub number: i64,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub title: String,
    pub description: String,
    pub creator_id: String,
    pub creator_agency: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    pub priority: Priority,
    pub status: TicketStatus,
    /// Active assignee. Non-null iff `status.requires_assignee()`.
    pub technician_id: Option<String>,
    /// Delegation marker: the deputy this ticket was handed to, if any.
    pub secretary_id: Option<String>,
    /// Technician who marked the ticket resolved; survives closure.
    pub resolved_by: Option<String>,
    pub resolution_summary: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub assigned_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub auto_closed_at: Option<OffsetDateTime>,
    pub feedback_score: Option<u8>,
    pub feedback_comment: Option<String>,
    /// Number of validation reminders already sent for the current resolution.
    pub reminders_sent: u8,

    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TicketRecord {
    /// Check the invariants every stored ticket must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        match (self.status.requires_assignee(), &self.technician_id) {
            (true, None) => {
                return Err(format!("status {} requires an assignee", self.status));
            }
            (false, Some(tech)) => {
                return Err(format!(
                    "status {} must not carry an assignee (found {})",
                    self.status, tech
                ));
            }
            _ => {}
        }
        if let Some(score) = self.feedback_score {
            if !(1..=5).contains(&score) {
                return Err(format!("feedback score {} outside 1..=5", score));
            }
            if self.status != TicketStatus::Closed {
                return Err(format!(
                    "feedback recorded while status is {}",
                    self.status
                ));
            }
        }
        if self.status == TicketStatus::Closed && self.closed_at.is_none() {
            return Err("closed ticket without closed_at".to_string());
        }
        Ok(())
    }
}

/// Input to `TicketStore::insert_ticket`. The store allocates id and number.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_type: TicketType,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub creator_id: String,
    pub creator_agency: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Structured detail attached to a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryMetadata {
    Assignment {
        technician_id: String,
        notes: Option<String>,
    },
    Reassignment {
        from: String,
        to: String,
    },
    Escalation {
        from: Priority,
        to: Priority,
    },
    Rejection {
        motive: String,
    },
    Reopen {
        technician_id: String,
    },
    AssignmentAccepted,
    AssignmentDeclined {
        technician_id: String,
    },
    AutoClose,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub ticket_id: String,
    /// Position within the ticket's history, dense from 0.
    pub seq: u32,
    pub old_status: Option<TicketStatus>,
    pub new_status: TicketStatus,
    pub user_id: String,
    pub reason: Option<String>,
    pub metadata: Option<HistoryMetadata>,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

/// Input to `TicketStore::append_history`. The store allocates id and seq.
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub ticket_id: String,
    pub old_status: Option<TicketStatus>,
    pub new_status: TicketStatus,
    pub user_id: String,
    pub reason: Option<String>,
    pub metadata: Option<HistoryMetadata>,
    pub changed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    Technical,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub ticket_id: String,
    pub user_id: String,
    pub content: String,
    pub kind: CommentKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Filter for `TicketStore::list_tickets`. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub ticket_type: Option<TicketType>,
    pub priority: Option<Priority>,
    pub creator_id: Option<String>,
    pub technician_id: Option<String>,
    /// `Some(Some(id))`: delegated to `id`; `Some(None)`: not delegated.
    pub secretary_id: Option<Option<String>>,
}

impl TicketFilter {
    pub fn matches(&self, t: &TicketRecord) -> bool {
        self.status.is_none_or(|s| t.status == s)
            && self.ticket_type.is_none_or(|ty| t.ticket_type == ty)
            && self.priority.is_none_or(|p| t.priority == p)
            && self
                .creator_id
                .as_ref()
                .is_none_or(|c| &t.creator_id == c)
            && self
                .technician_id
                .as_ref()
                .is_none_or(|tech| t.technician_id.as_ref() == Some(tech))
            && self
                .secretary_id
                .as_ref()
                .is_none_or(|sec| &t.secretary_id == sec)
    }
}
