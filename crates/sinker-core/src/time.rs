//! Time abstractions for testable timing behavior.
//!
//! Every time-dependent piece of the engine (store timestamps, retry
//! eligibility windows, backoff sleeps, latency measurement) goes through the
//! [`Clock`] trait. Production wires [`RealClock`]; tests wire [`TestClock`]
//! and drive time by hand, which makes backoff and sweep behavior
//! deterministic.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Clock abstraction for time operations.
///
/// Enables dependency injection of time sources. Production code uses
/// [`RealClock`]; tests inject [`TestClock`].
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Current wall-clock time as a chrono timestamp.
    ///
    /// Stores and lifecycle messages stamp rows with this.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`; in tests it advances
    /// virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the operating system.
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

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests.
///
/// Time stands still until [`advance`](TestClock::advance) or
/// [`jump_to`](TestClock::jump_to) moves it. `sleep` advances the clock by
/// the requested duration and yields, so code waiting on long backoffs
/// completes immediately while still observing the correct virtual elapsed
/// time. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Virtual nanoseconds advanced since construction.
    offset_ns: Arc<AtomicU64>,
    /// Wall time at offset zero, as nanoseconds since `UNIX_EPOCH`.
    wall_base_ns: Arc<AtomicU64>,
    /// Anchor for fabricated `Instant`s.
    origin: Instant,
}

impl TestClock {
    /// Creates a test clock whose wall time starts at the real current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock whose wall time starts at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            offset_ns: Arc::new(AtomicU64::new(0)),
            wall_base_ns: Arc::new(AtomicU64::new(ns_since_epoch(start))),
            origin: Instant::now(),
        }
    }

    /// Advances both monotonic and wall time by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.offset_ns.fetch_add(saturating_ns(duration), Ordering::AcqRel);
    }

    /// Moves wall time to `target` without disturbing monotonic time.
    ///
    /// Wall time may jump backwards; monotonic time never does.
    pub fn jump_to(&self, target: SystemTime) {
        let offset = self.offset_ns.load(Ordering::Acquire);
        let base = ns_since_epoch(target).saturating_sub(offset);
        self.wall_base_ns.store(base, Ordering::Release);
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        let ns = self.wall_base_ns.load(Ordering::Acquire)
            .saturating_add(self.offset_ns.load(Ordering::Acquire));
        UNIX_EPOCH + Duration::from_nanos(ns)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn ns_since_epoch(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    saturating_ns(since_epoch)
}

fn saturating_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
