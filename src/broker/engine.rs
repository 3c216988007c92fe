//! Delivery engine
//!
//! The façade the transport talks to. It validates and stamps submitted
//! records, hands them to the configured backend, and creates
//! `SubscriptionSession`s whose read strategy matches what the backend can
//! do:
//! - durable log: replay since a watermark, then poll
//! - volatile queue: drain the recipient's records with a bounded wait
//!
//! Concurrency notes:
//! - All methods take `&self`; share the engine through an `Arc`.
//! - `shutdown` flips a watch channel every open session observes, so all
//!   of them close within one poll interval.
//! - Server-assigned timestamps are strictly increasing per engine, so two
//!   server-stamped records never share a storage key.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::broker::directory::{StaticDirectory, UserDirectory};
use crate::broker::message::{MessageRecord, User};
use crate::broker::queue::VolatileQueue;
use crate::broker::retention::RetentionPolicy;
use crate::broker::session::{SessionSource, SubscriptionSession};
use crate::broker::store::{DestructiveQueueStore, ReplayableLogStore};
use crate::config::{BackendKind, Settings};
use crate::persistence::DurableLog;
use crate::utils::error::{StoreError, StoreResult, SubmitError};

/// The storage backend an engine delivers from.
#[derive(Clone)]
pub enum Backend {
    Queue(Arc<dyn DestructiveQueueStore>),
    Log(Arc<dyn ReplayableLogStore>),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Queue(_) => "volatile",
            Backend::Log(_) => "durable",
        }
    }

    fn append(&self, record: MessageRecord) -> StoreResult<()> {
        match self {
            Backend::Queue(queue) => queue.append(record),
            Backend::Log(log) => log.append(record),
        }
    }

    fn recipients_with_activity(&self) -> StoreResult<BTreeSet<String>> {
        match self {
            Backend::Queue(queue) => queue.recipients_with_activity(),
            Backend::Log(log) => log.recipients_with_activity(),
        }
    }
}

pub struct DeliveryEngine {
    backend: Backend,
    directory: Arc<dyn UserDirectory>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    last_stamp: AtomicI64,
}

impl DeliveryEngine {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

    pub fn new(
        backend: Backend,
        directory: Arc<dyn UserDirectory>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            directory,
            poll_interval,
            shutdown,
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Engine over a fresh volatile queue and the static user list.
    pub fn volatile(policy: RetentionPolicy, poll_interval: Duration) -> Self {
        Self::new(
            Backend::Queue(Arc::new(VolatileQueue::new(policy))),
            Arc::new(StaticDirectory::default()),
            poll_interval,
        )
    }

    /// Engine over a durable log, which also serves the user directory.
    pub fn durable(log: DurableLog, poll_interval: Duration) -> Self {
        let log = Arc::new(log);
        Self::new(Backend::Log(log.clone()), log, poll_interval)
    }

    /// Builds the engine described by `settings`, opening the sled database
    /// when the durable backend is selected.
    pub fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        let delivery = &settings.delivery;
        let poll_interval = Duration::from_millis(delivery.poll_interval_ms);
        let policy = RetentionPolicy::with_max_backlog(delivery.max_backlog).unwrap_or_default();

        let engine = match delivery.backend {
            BackendKind::Volatile => Self::volatile(policy, poll_interval),
            BackendKind::Durable => {
                let log = DurableLog::open(&settings.storage.path)?;
                log.seed_users(&StaticDirectory::default())?;
                Self::durable(log, poll_interval)
            }
        };
        info!(backend = engine.backend.name(), ?poll_interval, "delivery engine ready");
        Ok(engine)
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Validates, stamps and stores a record. Returns the stored copy.
    ///
    /// Store errors are not retried here; retrying is up to the producer.
    pub fn submit(&self, record: MessageRecord) -> Result<MessageRecord, SubmitError> {
        if record.to_user().is_empty() {
            return Err(SubmitError::InvalidRecipient);
        }
        if record.from_user().is_empty() {
            return Err(SubmitError::InvalidSender);
        }
        if !(0..=MessageRecord::MAX_TIMESTAMP).contains(&record.timestamp()) {
            return Err(SubmitError::InvalidTimestamp(record.timestamp()));
        }

        let record = if record.is_stamped() {
            self.last_stamp.fetch_max(record.timestamp(), Ordering::SeqCst);
            record
        } else {
            record.stamped(self.next_timestamp())
        };

        self.backend.append(record.clone())?;
        debug!(
            from_user = record.from_user(),
            to_user = record.to_user(),
            timestamp = record.timestamp(),
            "message stored"
        );
        Ok(record)
    }

    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let next = |last: i64| now.max(last.saturating_add(1));
        match self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(prev) | Err(prev) => next(prev),
        }
    }

    /// Opens a session for `recipient` starting after watermark `since`
    /// (`0` replays the whole backlog). The caller drives it.
    pub fn open_subscription(
        &self,
        recipient: &str,
        since: i64,
    ) -> Result<SubscriptionSession, SubmitError> {
        if recipient.is_empty() {
            return Err(SubmitError::InvalidRecipient);
        }
        let source = match &self.backend {
            Backend::Queue(queue) => SessionSource::Drain(queue.clone()),
            Backend::Log(log) => SessionSource::Replay(log.clone()),
        };
        info!(recipient, since, backend = self.backend.name(), "subscription opened");
        Ok(SubscriptionSession::new(
            recipient.to_string(),
            source,
            since,
            self.poll_interval,
            self.shutdown.subscribe(),
        ))
    }

    /// Takes every pending record, blocking until one arrives.
    pub fn drain_all(&self) -> Result<Vec<MessageRecord>, SubmitError> {
        match &self.backend {
            Backend::Queue(queue) => Ok(queue.drain_all()),
            Backend::Log(_) => Err(SubmitError::Unsupported(self.backend.name())),
        }
    }

    /// Takes every pending record, waiting at most `timeout`.
    pub fn drain_all_timeout(&self, timeout: Duration) -> Result<Vec<MessageRecord>, SubmitError> {
        match &self.backend {
            Backend::Queue(queue) => Ok(queue.drain_all_timeout(timeout)),
            Backend::Log(_) => Err(SubmitError::Unsupported(self.backend.name())),
        }
    }

    /// Returns records that were drained but never reached a consumer.
    /// The durable log keeps everything, so there is nothing to do there.
    pub fn requeue(&self, records: Vec<MessageRecord>) {
        if let Backend::Queue(queue) = &self.backend {
            queue.requeue_front(records);
        }
    }

    /// Directory users ordered by login.
    pub fn list_users(&self) -> Result<Vec<User>, SubmitError> {
        let mut users = self.directory.list_users()?;
        users.sort_by(|a, b| a.login.cmp(&b.login));
        Ok(users)
    }

    pub fn recipients_with_activity(&self) -> Result<BTreeSet<String>, SubmitError> {
        Ok(self.backend.recipients_with_activity()?)
    }

    /// Closes every open session within one poll interval.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("delivery engine shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("backend", &self.backend.name())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
