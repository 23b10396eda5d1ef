//! Time abstraction for testable staleness and polling behavior.
//!
//! The stale-lock window makes selection time-dependent, so every component
//! that reads the clock takes it through this trait. Production code uses
//! `SystemClock`; tests inject a `TestClock` and advance it explicitly.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Clock abstraction for wall-clock reads and async sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// Production maps to `tokio::time::sleep`; test clocks advance virtual
    /// time and yield immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Starts at a fixed base time and only moves when advanced. Clones share
/// the same underlying offset, so a clock handed to a store and one kept by
/// the test stay in step.
#[derive(Debug, Clone)]
pub struct TestClock {
    base: DateTime<Utc>,
    offset_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start(Utc::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start(start: DateTime<Utc>) -> Self {
        Self { base: start, offset_ms: Arc::new(AtomicI64::new(0)) }
    }

    /// Advances the clock by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let offset = self.offset_ms.load(Ordering::Acquire);
        self.base + chrono::Duration::milliseconds(offset)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now_utc();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(10));
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = TestClock::new();
        let handle = clock.clone();

        clock.advance(Duration::from_secs(60));

        assert_eq!(handle.now_utc(), clock.now_utc());
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_virtual_time() {
        let clock = TestClock::new();
        let start = clock.now_utc();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(5));
    }
}
