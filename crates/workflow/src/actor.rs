use std::fmt;
use std::str::FromStr;

use helpdesk_storage::{ParseEnumError, TicketType};
use serde::{Deserialize, Serialize};

/// Organizational role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Technician,
    Secretary,
    DeputyDirector,
    Director,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::User,
        Role::Technician,
        Role::Secretary,
        Role::DeputyDirector,
        Role::Director,
        Role::Admin,
    ];

    /// Roles that manage the queue: assign, reassign, reopen, close, see everything.
    pub const STAFF: &'static [Role] = &[
        Role::Secretary,
        Role::DeputyDirector,
        Role::Director,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Technician => "technician",
            Role::Secretary => "secretary",
            Role::DeputyDirector => "deputy_director",
            Role::Director => "director",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(self) -> bool {
        Role::STAFF.contains(&self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "role",
                value: s.to_string(),
            })
    }
}

/// The authenticated caller of a workflow operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Actor {
            id: id.into(),
            role,
        }
    }
}

/// A user as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub agency: Option<String>,
    /// Only meaningful for technicians. `None` means "handles any type".
    #[serde(default)]
    pub specialization: Option<TicketType>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl UserProfile {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id.clone(), self.role)
    }
}

/// An active technician eligible for assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TechnicianProfile {
    pub id: String,
    pub full_name: String,
    pub specialization: Option<TicketType>,
}
