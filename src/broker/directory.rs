//! User directory seam
//!
//! The engine only ever lists users. `StaticDirectory` serves a fixed list;
//! the sled-backed `DurableLog` also implements `UserDirectory` for users
//! saved under `user.<login>`.

use crate::broker::message::User;
use crate::utils::error::StoreResult;

pub trait UserDirectory: Send + Sync {
    fn list_users(&self) -> StoreResult<Vec<User>>;
}

#[derive(Debug, Clone)]
pub struct StaticDirectory {
    users: Vec<User>,
}

impl StaticDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new(vec![
            User::new("user1", "John Wick"),
            User::new("user2", "Johnny Depp"),
        ])
    }
}

impl UserDirectory for StaticDirectory {
    fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.users.clone())
    }
}
