//! Subscription sessions
//!
//! A `SubscriptionSession` streams one recipient's messages to one consumer.
//! It is an explicit state machine:
//!
//! - `Replaying`: the first poll reads the backlog once and emits it.
//! - `Tailing`: later polls read only what arrived after the watermark.
//! - `Closed`: terminal; nothing else is emitted.
//!
//! Two read strategies exist, picked by the engine from the backend:
//! - replay (durable log): `query_since(recipient, watermark)`, sleeping for
//!   the poll interval between empty reads. Emitted timestamps are strictly
//!   increasing and never repeat.
//! - drain (volatile queue): a bounded condvar wait that removes the
//!   recipient's records from the shared queue. Emission order is FIFO.
//!
//! Every wait is bounded by the poll interval and liveness is checked before
//! each emission and each wait, so a session notices a departed consumer or
//! an engine shutdown within one poll interval. Drained records that could
//! not be handed over are put back at the head of the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::broker::message::MessageRecord;
use crate::broker::store::{DestructiveQueueStore, ReplayableLogStore};
use crate::utils::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Replaying,
    Tailing,
    Closed,
}

#[derive(Clone)]
pub(crate) enum SessionSource {
    Replay(Arc<dyn ReplayableLogStore>),
    Drain(Arc<dyn DestructiveQueueStore>),
}

pub struct SubscriptionSession {
    recipient: String,
    source: SessionSource,
    watermark: i64,
    state: SessionState,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SubscriptionSession {
    pub(crate) fn new(
        recipient: String,
        source: SessionSource,
        since: i64,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            recipient,
            source,
            watermark: since,
            state: SessionState::Replaying,
            poll_interval,
            shutdown,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Timestamp of the last record this session emitted.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(recipient = %self.recipient, watermark = self.watermark, "session closed");
            self.state = SessionState::Closed;
        }
    }

    /// True once the engine has been shut down or dropped.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Performs one read step and returns the records it emits, advancing
    /// the watermark past them.
    ///
    /// The first call replays the backlog and moves the session to
    /// `Tailing`. On a drain session a tailing call blocks (off the async
    /// runtime) for at most one poll interval.
    pub async fn poll(&mut self) -> StoreResult<Vec<MessageRecord>> {
        if self.state == SessionState::Closed {
            return Ok(Vec::new());
        }
        if self.is_shutdown() {
            self.close();
            return Ok(Vec::new());
        }

        let batch = match self.source.clone() {
            SessionSource::Replay(store) => {
                let recipient = self.recipient.clone();
                let since = self.watermark;
                let records = tokio::task::spawn_blocking(move || store.query_since(&recipient, since))
                    .await
                    .map_err(|e| StoreError::Transient(e.to_string()))??;
                self.accept_ordered(records)
            }
            SessionSource::Drain(queue) => {
                let recipient = self.recipient.clone();
                let wait = match self.state {
                    SessionState::Replaying => Duration::ZERO,
                    _ => self.poll_interval,
                };
                let records = tokio::task::spawn_blocking(move || {
                    queue.drain_recipient_timeout(&recipient, wait)
                })
                .await
                .map_err(|e| StoreError::Transient(e.to_string()))?;
                self.accept_fifo(records)
            }
        };

        if self.state == SessionState::Replaying {
            debug!(recipient = %self.recipient, replayed = batch.len(), "backlog replayed");
            self.state = SessionState::Tailing;
        }
        Ok(batch)
    }

    // Keeps only records past the watermark, in strictly increasing order.
    fn accept_ordered(&mut self, mut records: Vec<MessageRecord>) -> Vec<MessageRecord> {
        records.sort_by_key(MessageRecord::timestamp);
        let mut accepted = Vec::with_capacity(records.len());
        for record in records {
            if record.timestamp() > self.watermark {
                self.watermark = record.timestamp();
                accepted.push(record);
            }
        }
        accepted
    }

    fn accept_fifo(&mut self, records: Vec<MessageRecord>) -> Vec<MessageRecord> {
        if let Some(max) = records.iter().map(MessageRecord::timestamp).max() {
            self.watermark = self.watermark.max(max);
        }
        records
    }

    // Drained records are gone from the shared queue once taken, so the
    // ones nobody received go back to its head. The log keeps its own copy.
    fn give_back(&self, records: Vec<MessageRecord>) {
        if let SessionSource::Drain(queue) = &self.source {
            debug!(recipient = %self.recipient, count = records.len(), "consumer gone, requeueing");
            queue.requeue_front(records);
        }
    }

    fn is_live(&self, sink: &mpsc::UnboundedSender<MessageRecord>) -> bool {
        self.state != SessionState::Closed && !self.is_shutdown() && !sink.is_closed()
    }

    async fn pause(&mut self, sink: &mpsc::UnboundedSender<MessageRecord>) {
        let interval = self.poll_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.shutdown.changed() => {}
            _ = sink.closed() => {}
        }
    }

    /// Drives the session, sending every emitted record into `sink`, until
    /// the receiving side is dropped or the engine shuts down.
    ///
    /// Transient store failures are logged and retried after the poll
    /// interval. `StoreError::Unavailable` closes the session and is
    /// returned.
    pub async fn run(mut self, sink: mpsc::UnboundedSender<MessageRecord>) -> StoreResult<()> {
        loop {
            if !self.is_live(&sink) {
                self.close();
                return Ok(());
            }

            match self.poll().await {
                Ok(batch) => {
                    let idle = batch.is_empty();
                    let mut pending = batch.into_iter();
                    while let Some(record) = pending.next() {
                        let undelivered = if self.is_live(&sink) {
                            match sink.send(record) {
                                Ok(()) => continue,
                                Err(mpsc::error::SendError(record)) => record,
                            }
                        } else {
                            record
                        };
                        self.give_back(std::iter::once(undelivered).chain(pending).collect());
                        self.close();
                        return Ok(());
                    }
                    // drain reads already waited inside the condvar
                    if idle && matches!(self.source, SessionSource::Replay(_)) {
                        self.pause(&sink).await;
                    }
                }
                Err(e) if e.is_permanent() => {
                    error!(recipient = %self.recipient, "subscription terminated: {e}");
                    self.close();
                    return Err(e);
                }
                Err(e) => {
                    warn!(recipient = %self.recipient, "read failed, retrying: {e}");
                    self.pause(&sink).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = match self.source {
            SessionSource::Replay(_) => "replay",
            SessionSource::Drain(_) => "drain",
        };
        f.debug_struct("SubscriptionSession")
            .field("recipient", &self.recipient)
            .field("strategy", &strategy)
            .field("watermark", &self.watermark)
            .field("state", &self.state)
            .finish()
    }
}
