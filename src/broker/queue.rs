//! Volatile queue backend
//!
//! A single in-memory FIFO shared by every recipient, guarded by a mutex and
//! signalled through a condition variable. Appends wake every blocked
//! reader; reads remove what they return.
//!
//! Usage notes:
//! - This is a single-consumer work queue, not a publish/subscribe fan-out.
//!   Whoever drains a record takes it away from everybody else.
//! - The `RetentionPolicy` caps the total backlog; oldest records are
//!   evicted first when a producer pushes past the cap.
//! - Drains block the calling thread. Async callers should run them on the
//!   blocking pool and prefer the bounded variants.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::broker::message::MessageRecord;
use crate::broker::retention::RetentionPolicy;
use crate::broker::store::{DestructiveQueueStore, MessageStore};
use crate::utils::error::StoreResult;

#[derive(Debug, Default)]
pub struct VolatileQueue {
    queue: Mutex<VecDeque<MessageRecord>>,
    available: Condvar,
    policy: RetentionPolicy,
}

impl VolatileQueue {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<MessageRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageStore for VolatileQueue {
    fn append(&self, record: MessageRecord) -> StoreResult<()> {
        let mut queue = self.lock();
        queue.push_back(record);

        let excess = self.policy.excess(queue.len());
        for evicted in queue.drain(..excess) {
            debug!(
                to_user = evicted.to_user(),
                timestamp = evicted.timestamp(),
                "backlog full, evicted oldest message"
            );
        }

        self.available.notify_all();
        Ok(())
    }

    fn recipients_with_activity(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .lock()
            .iter()
            .map(|record| record.to_user().to_string())
            .collect())
    }
}

impl DestructiveQueueStore for VolatileQueue {
    fn drain_all(&self) -> Vec<MessageRecord> {
        let mut queue = self
            .available
            .wait_while(self.lock(), |queue| queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }

    fn drain_all_timeout(&self, timeout: Duration) -> Vec<MessageRecord> {
        let (mut queue, _) = self
            .available
            .wait_timeout_while(self.lock(), timeout, |queue| queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }

    fn drain_recipient_timeout(&self, recipient: &str, timeout: Duration) -> Vec<MessageRecord> {
        let (mut queue, _) = self
            .available
            .wait_timeout_while(self.lock(), timeout, |queue| {
                !queue.iter().any(|record| record.to_user() == recipient)
            })
            .unwrap_or_else(PoisonError::into_inner);

        let (taken, kept): (Vec<_>, Vec<_>) = queue
            .drain(..)
            .partition(|record| record.to_user() == recipient);
        *queue = kept.into();
        taken
    }

    fn requeue_front(&self, records: Vec<MessageRecord>) {
        if records.is_empty() {
            return;
        }
        let mut queue = self.lock();
        debug!(count = records.len(), "returning undelivered messages to the queue");
        for record in records.into_iter().rev() {
            queue.push_front(record);
        }

        // the cap still holds; anything past it is older than the queue tail
        let excess = self.policy.excess(queue.len());
        for evicted in queue.drain(..excess) {
            debug!(
                to_user = evicted.to_user(),
                timestamp = evicted.timestamp(),
                "backlog full, dropped returned message"
            );
        }

        self.available.notify_all();
    }
}
