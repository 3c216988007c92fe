//! Durable log backed by `sled`
//!
//! Messages live in the default tree under
//! `message.<to_user>.<timestamp:020>` as JSON, users under `user.<login>`.
//! Reads never remove anything, so any number of sessions can replay the
//! same history from their own watermark.
//!
//! Notes:
//! - A prefix scan over `message.<to_user>.` can also match recipients whose
//!   login starts with `<to_user>.`; decoded records are filtered on
//!   `to_user` after the scan.
//! - Entries that fail to decode are logged and skipped.
//! - The key is `(to_user, timestamp)`, so two records for one recipient
//!   with the same producer-supplied timestamp overwrite each other.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use sled::Db;
use tracing::{debug, warn};

use crate::broker::directory::UserDirectory;
use crate::broker::message::{MessageRecord, User};
use crate::broker::store::{MessageStore, ReplayableLogStore};
use crate::utils::error::{StoreError, StoreResult};

const MESSAGE_PREFIX: &str = "message.";
const USER_PREFIX: &str = "user.";

pub struct DurableLog {
    db: Db,
    closed: AtomicBool,
}

impl DurableLog {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        debug!(path = %path.display(), "durable log opened");
        Ok(Self::from_db(db))
    }

    pub fn from_db(db: Db) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    /// Flushes pending writes and refuses every later operation with
    /// `StoreError::Unavailable`.
    pub fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.flush()?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("durable log is closed".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn save_user(&self, user: &User) -> StoreResult<()> {
        self.ensure_open()?;
        let value = serde_json::to_vec(user)?;
        self.db.insert(user.storage_key().as_bytes(), value)?;
        Ok(())
    }

    pub fn get_user(&self, login: &str) -> StoreResult<Option<User>> {
        self.ensure_open()?;
        let key = User::key_for(login);
        match self.db.get(key.as_bytes())? {
            Some(value) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Saves every user from `directory` that is not stored yet.
    pub fn seed_users(&self, directory: &dyn UserDirectory) -> StoreResult<()> {
        for user in directory.list_users()? {
            if self.get_user(&user.login)?.is_none() {
                self.save_user(&user)?;
            }
        }
        Ok(())
    }

    // Decodes every entry under `prefix`, skipping the ones that fail.
    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<T>> {
        self.ensure_open()?;
        let mut decoded = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(item) => decoded.push(item),
                Err(e) => {
                    let err = StoreError::Corrupt {
                        key: String::from_utf8_lossy(&key).into_owned(),
                        reason: e.to_string(),
                    };
                    warn!("skipping entry: {err}");
                }
            }
        }
        Ok(decoded)
    }
}

impl MessageStore for DurableLog {
    fn append(&self, record: MessageRecord) -> StoreResult<()> {
        self.ensure_open()?;
        let value = serde_json::to_vec(&record)?;
        self.db.insert(record.storage_key().as_bytes(), value)?;
        Ok(())
    }

    fn recipients_with_activity(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .scan::<MessageRecord>(MESSAGE_PREFIX)?
            .into_iter()
            .map(|record| record.to_user().to_string())
            .collect())
    }
}

impl ReplayableLogStore for DurableLog {
    fn query_since(&self, recipient: &str, since: i64) -> StoreResult<Vec<MessageRecord>> {
        let mut records: Vec<MessageRecord> = self
            .scan::<MessageRecord>(&MessageRecord::recipient_prefix(recipient))?
            .into_iter()
            .filter(|record| record.to_user() == recipient && record.timestamp() > since)
            .collect();
        records.sort_by_key(MessageRecord::timestamp);
        Ok(records)
    }
}

impl UserDirectory for DurableLog {
    fn list_users(&self) -> StoreResult<Vec<User>> {
        self.scan(USER_PREFIX)
    }
}

impl std::fmt::Debug for DurableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableLog")
            .field("db", &"sled::Db")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
