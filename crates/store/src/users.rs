//! Boundary to the external identity system. The engine only reads users:
//! existence, display details for listings, and the admin capability.

use dashmap::DashMap;
use rewards_core::loyalty::UserId;
use rewards_core::LoyaltyResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    /// Single capability flag consulted by tier resolution.
    #[serde(default)]
    pub is_admin: bool,
}

pub trait UserDirectory: Send + Sync {
    fn find(&self, user_id: &str) -> LoyaltyResult<Option<UserRecord>>;

    /// Ids of users whose name, email or mobile contains `term`
    /// (case-insensitive).
    fn search(&self, term: &str) -> LoyaltyResult<Vec<UserId>>;
}

/// In-memory directory used by tests and the CLI.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<UserId, UserRecord>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, user: UserRecord) {
        self.users.insert(user.user_id.clone(), user);
    }

    pub fn set_admin(&self, user_id: &str, is_admin: bool) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.value_mut().is_admin = is_admin;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find(&self, user_id: &str) -> LoyaltyResult<Option<UserRecord>> {
        Ok(self.users.get(user_id).map(|r| r.value().clone()))
    }

    fn search(&self, term: &str) -> LoyaltyResult<Vec<UserId>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let contains = |field: Option<&str>| {
            field.is_some_and(|value| value.to_lowercase().contains(&needle))
        };
        let mut ids: Vec<UserId> = self
            .users
            .iter()
            .filter(|r| {
                let u = r.value();
                contains(Some(u.name.as_str()))
                    || contains(u.email.as_deref())
                    || contains(u.mobile.as_deref())
            })
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
