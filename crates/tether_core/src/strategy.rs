//! Refresh strategies decide whether a fetch may proceed.
//!
//! A strategy is consulted on every request attempt, by a [`Source`](crate::Source)
//! before it starts a retrieval and by a [`DataController`](crate::DataController)
//! before it enters the loading state. Returning `false` makes the request a
//! silent no-op.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

/// Something a strategy can be asked about.
pub trait Refreshable {
    /// Whether cached data currently exists for this subject.
    fn has_stored_data(&self) -> bool;

    /// Label used when a strategy logs its decision.
    fn subject_name(&self) -> &str {
        "unnamed"
    }
}

/// Decides when data should get refreshed.
pub trait RefreshStrategy: Send + Sync + Debug {
    fn should_refresh(&self, subject: &dyn Refreshable) -> bool;
}

/// Default strategy: every request refreshes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRefresh;

impl RefreshStrategy for AlwaysRefresh {
    fn should_refresh(&self, _subject: &dyn Refreshable) -> bool {
        true
    }
}

/// Allows exactly one refresh, then declines until reset.
#[derive(Debug)]
pub struct OneShotRefresh {
    should_refresh: AtomicBool,
}

impl OneShotRefresh {
    pub fn new() -> Self {
        Self {
            should_refresh: AtomicBool::new(true),
        }
    }

    pub fn set_should_refresh(&self, should_refresh: bool) {
        self.should_refresh.store(should_refresh, Ordering::Release);
    }

    /// Re-arm the strategy so the next call allows a refresh.
    pub fn reset(&self) {
        self.set_should_refresh(true);
    }
}

impl Default for OneShotRefresh {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshStrategy for OneShotRefresh {
    fn should_refresh(&self, _subject: &dyn Refreshable) -> bool {
        self.should_refresh.swap(false, Ordering::AcqRel)
    }
}

/// Refreshes only while nothing is stored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshWhenEmpty;

impl RefreshStrategy for RefreshWhenEmpty {
    fn should_refresh(&self, subject: &dyn Refreshable) -> bool {
        !subject.has_stored_data()
    }
}

/// Allows at most one refresh per interval.
#[derive(Debug)]
pub struct MinIntervalRefresh {
    interval: Duration,
    last_allowed: Mutex<Option<Instant>>,
}

impl MinIntervalRefresh {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_allowed: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forget the last refresh so the next call is allowed.
    pub fn reset(&self) {
        *self.last_allowed.lock() = None;
    }
}

impl RefreshStrategy for MinIntervalRefresh {
    fn should_refresh(&self, subject: &dyn Refreshable) -> bool {
        let now = Instant::now();
        let mut last = self.last_allowed.lock();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => {
                trace!(
                    subject = subject.subject_name(),
                    since_ms = now.duration_since(at).as_millis() as u64,
                    "refreshed too recently"
                );
                false
            }
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
