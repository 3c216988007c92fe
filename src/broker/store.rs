//! Store capabilities
//!
//! The two backends expose genuinely different delivery models, so they do
//! not share a single read interface:
//! - `DestructiveQueueStore`: a shared queue where every read removes what
//!   it returns (single-consumer work queue).
//! - `ReplayableLogStore`: an append-only log that any number of readers can
//!   replay independently from their own watermark.
//!
//! Both accept writes through the common `MessageStore` trait.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::broker::message::MessageRecord;
use crate::utils::error::StoreResult;

pub trait MessageStore: Send + Sync {
    /// Persist or enqueue a record. Safe to call from many producers.
    fn append(&self, record: MessageRecord) -> StoreResult<()>;

    /// Recipients that currently have stored messages. Diagnostics only.
    fn recipients_with_activity(&self) -> StoreResult<BTreeSet<String>>;
}

pub trait DestructiveQueueStore: MessageStore {
    /// Remove and return every queued record, blocking until one exists.
    fn drain_all(&self) -> Vec<MessageRecord>;

    /// Like `drain_all`, but gives up after `timeout` with an empty batch.
    fn drain_all_timeout(&self, timeout: Duration) -> Vec<MessageRecord>;

    /// Remove and return the records addressed to `recipient`, waiting at
    /// most `timeout` for one to arrive. Other recipients' records stay.
    fn drain_recipient_timeout(&self, recipient: &str, timeout: Duration) -> Vec<MessageRecord>;

    /// Put drained but undelivered records back at the head of the queue,
    /// keeping their order, so the next reader sees them first.
    fn requeue_front(&self, records: Vec<MessageRecord>);
}

pub trait ReplayableLogStore: MessageStore {
    /// Records for `recipient` with `timestamp > since`, oldest first.
    fn query_since(&self, recipient: &str, since: i64) -> StoreResult<Vec<MessageRecord>>;
}
