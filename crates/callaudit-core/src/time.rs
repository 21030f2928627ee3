//! Clock abstraction for event timestamps and retry backoff.
//!
//! Event timestamps and every sleep in the call and audit paths go through
//! a `Clock`, so tests can run multi-second backoff schedules instantly.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Source of time for the audit pipeline.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for measuring durations.
    fn now(&self) -> Instant;

    /// Wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Wall-clock time as a UTC timestamp, used for event construction.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// Time only moves when `advance` is called or when something sleeps; a
/// sleep advances the clock by its duration and yields once. Clones share
/// the same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    origin_instant: Instant,
    origin_system: SystemTime,
}

impl TestClock {
    /// Creates a clock whose wall time starts at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a clock whose wall time starts at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            origin_instant: Instant::now(),
            origin_system: start,
        }
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        self.origin_system + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
