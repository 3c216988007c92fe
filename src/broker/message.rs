//! Message and user definitions
//!
//! `MessageRecord` is the canonical internal and stored representation of
//! one addressed chat message. Fields are private so a record cannot change
//! after it is built; the engine produces a stamped copy instead.
//!
//! Notes on fields:
//! - `from_user` / `to_user`: sender and recipient logins
//! - `body`: free text, may be empty
//! - `timestamp`: milliseconds since UNIX epoch; `0` means "not set yet",
//!   in which case the engine assigns one on submit. Negative values and
//!   values past `MAX_TIMESTAMP` are rejected on submit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    from_user: String,
    to_user: String,
    body: String,
    timestamp: i64,
}

impl MessageRecord {
    /// Largest accepted timestamp, 9999-12-31T23:59:59.999Z in milliseconds.
    pub const MAX_TIMESTAMP: i64 = 253_402_300_799_999;

    pub fn new(
        from_user: impl Into<String>,
        to_user: impl Into<String>,
        body: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            from_user: from_user.into(),
            to_user: to_user.into(),
            body: body.into(),
            timestamp,
        }
    }

    /// A record without a timestamp; the engine stamps it on submit.
    pub fn unstamped(
        from_user: impl Into<String>,
        to_user: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(from_user, to_user, body, 0)
    }

    pub fn from_user(&self) -> &str {
        &self.from_user
    }

    pub fn to_user(&self) -> &str {
        &self.to_user
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_stamped(&self) -> bool {
        self.timestamp != 0
    }

    /// Copy of this record carrying `timestamp`.
    pub fn stamped(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// Key under which the durable log stores this record.
    ///
    /// The timestamp is zero-padded so lexicographic key order matches
    /// numeric order for non-negative values.
    pub fn storage_key(&self) -> String {
        format!("{}{:020}", Self::recipient_prefix(&self.to_user), self.timestamp)
    }

    /// Key prefix shared by every record addressed to `recipient`.
    pub fn recipient_prefix(recipient: &str) -> String {
        format!("message.{recipient}.")
    }
}

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub full_name: String,
}

impl User {
    pub fn new(login: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            full_name: full_name.into(),
        }
    }

    pub fn storage_key(&self) -> String {
        Self::key_for(&self.login)
    }

    pub fn key_for(login: &str) -> String {
        format!("user.{login}")
    }
}
