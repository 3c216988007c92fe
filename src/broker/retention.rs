//! Retention policy for the volatile queue
//!
//! The policy caps the number of undelivered messages held across all
//! recipients. When the cap is exceeded the oldest messages go first.

use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_backlog: NonZeroUsize,
}

impl RetentionPolicy {
    /// Backlog used by the original single-queue service.
    pub const DEFAULT_MAX_BACKLOG: usize = 10;

    pub fn new(max_backlog: NonZeroUsize) -> Self {
        Self { max_backlog }
    }

    /// Returns `None` when `max_backlog` is zero.
    pub fn with_max_backlog(max_backlog: usize) -> Option<Self> {
        NonZeroUsize::new(max_backlog).map(Self::new)
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog.get()
    }

    /// Number of oldest entries to drop from a queue holding `len` entries.
    pub fn excess(&self, len: usize) -> usize {
        len.saturating_sub(self.max_backlog.get())
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::with_max_backlog(Self::DEFAULT_MAX_BACKLOG).unwrap_or(Self {
            max_backlog: NonZeroUsize::MIN,
        })
    }
}
