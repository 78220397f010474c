//! Time abstractions for testable scheduling.
//!
//! The delivery pipeline measures response times and schedules retries
//! against a `Clock` trait so tests can control time instead of sleeping
//! through real backoff delays. Timestamps are UTC because every
//! scheduling decision and delivery record in the relay is keyed by
//! `DateTime<Utc>`.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction for time operations.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to make
/// backoff scheduling and timestamps deterministic.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current UTC time for timestamps and retry deadlines.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock with controllable time progression.
///
/// Time only moves when a test calls [`TestClock::advance`] or awaits
/// `sleep`, which advances immediately and yields so polling loops
/// fast-forward through idle periods instead of waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Nanoseconds elapsed since the clock's epoch.
    elapsed_ns: Arc<AtomicU64>,
    /// UTC time at which the clock started.
    epoch_utc: DateTime<Utc>,
    /// Instant at which the clock started.
    epoch_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at 2024-01-01T00:00:00Z.
    ///
    /// A fixed epoch keeps timestamps in failure output recognizable.
    pub fn new() -> Self {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
        Self::starting_at(epoch)
    }

    /// Creates a test clock starting at the given UTC time.
    pub fn starting_at(epoch_utc: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            epoch_utc,
            epoch_instant: Instant::now(),
        }
    }

    /// Moves the clock forward by the given duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Returns how far the clock has been advanced.
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
        self.epoch_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.epoch_utc
            + chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        // Yield so other tasks observe the advanced clock
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_monotonic_time() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
    }

    #[test]
    fn advance_moves_utc_time() {
        let epoch = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid date");
        let clock = TestClock::starting_at(epoch);

        assert_eq!(clock.now_utc(), epoch);

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_utc(), epoch + chrono::Duration::seconds(60));
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = TestClock::new();
        let observer = clock.clone();

        clock.advance(Duration::from_millis(250));

        assert_eq!(observer.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sleep_advances_immediately() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
    }
}
