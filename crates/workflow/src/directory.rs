use std::collections::HashMap;

use async_trait::async_trait;

use crate::actor::{Role, UserProfile, TechnicianProfile};

/// Error returned by a directory backend.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DirectoryError(pub String);

/// Lookup of users by id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns `Ok(None)` for unknown ids.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError>;
}

/// Enumeration of technicians eligible for assignment.
#[async_trait]
pub trait TechnicianDirectory: Send + Sync {
    /// Active technicians in a stable order.
    async fn list_technicians(&self) -> Result<Vec<TechnicianProfile>, DirectoryError>;
}

/// A directory loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<UserProfile>,
    by_id: HashMap<String, usize>,
}

impl StaticDirectory {
    /// Later duplicates of an id replace earlier ones.
    pub fn new(users: Vec<UserProfile>) -> Self {
        let mut dir = StaticDirectory::default();
        for user in users {
            match dir.by_id.get(&user.id) {
                Some(&idx) => dir.users[idx] = user,
                None => {
                    dir.by_id.insert(user.id.clone(), dir.users.len());
                    dir.users.push(user);
                }
            }
        }
        dir
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn lookup(&self, user_id: &str) -> Option<&UserProfile> {
        self.by_id.get(user_id).map(|&idx| &self.users[idx])
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self.lookup(user_id).cloned())
    }
}

#[async_trait]
impl TechnicianDirectory for StaticDirectory {
    async fn list_technicians(&self) -> Result<Vec<TechnicianProfile>, DirectoryError> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.active && u.role == Role::Technician)
            .map(|u| TechnicianProfile {
                id: u.id.clone(),
                full_name: u.full_name.clone(),
                specialization: u.specialization,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_storage::TicketType;

    fn user(id: &str, role: Role, active: bool) -> UserProfile {
        UserProfile {
            id: id.into(),
            full_name: id.to_uppercase(),
            role,
            agency: None,
            specialization: (role == Role::Technician).then_some(TicketType::Material),
            active,
        }
    }

    #[tokio::test]
    async fn lists_only_active_technicians() {
        let dir = StaticDirectory::new(vec![
            user("t1", Role::Technician, true),
            user("u1", Role::User, true),
            user("t2", Role::Technician, false),
            user("t3", Role::Technician, true),
        ]);
        let techs = dir.list_technicians().await.unwrap();
        let ids: Vec<_> = techs.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn duplicate_ids_replace() {
        let dir = StaticDirectory::new(vec![
            user("x", Role::User, true),
            user("x", Role::Secretary, true),
        ]);
        assert_eq!(dir.len(), 1);
        let x = dir.get_user("x").await.unwrap().unwrap();
        assert_eq!(x.role, Role::Secretary);
        assert!(dir.get_user("nobody").await.unwrap().is_none());
    }
}
