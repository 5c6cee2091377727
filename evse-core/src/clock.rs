//! Monotonic time and wall-clock time, injectable so schedule-period logic
//! can be driven deterministically in tests.
//!
//! Every constructor that needs "now" takes a `Clock` as a parameter rather
//! than calling `Utc::now()`/`Instant::now()` directly — there is no ambient
//! time source anywhere in this crate.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time for session state, profile schedules, and
/// timer scheduling.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `dur`, yielding to the async runtime.
    fn sleep(&self, dur: Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
}

/// Real clock backed by the system time and the tokio timer wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, dur: Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(dur))
    }
}

/// Clock pinned to a fixed instant, advanced explicitly by tests.
///
/// `sleep` resolves immediately: tests that need to observe intermediate
/// state should call [`SteppedClock::advance`] between assertions rather
/// than relying on real elapsed time.
#[derive(Debug, Clone)]
pub struct SteppedClock {
    micros_since_epoch: Arc<AtomicI64>,
}

impl SteppedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros_since_epoch: Arc::new(AtomicI64::new(start.timestamp_micros())),
        }
    }

    pub fn advance(&self, dur: Duration) {
        self.micros_since_epoch
            .fetch_add(dur.as_micros() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.micros_since_epoch
            .store(at.timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros_since_epoch.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    fn sleep(&self, _dur: Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(std::future::ready(()))
    }
}

/// A shared, cloneable handle to any [`Clock`] implementation.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stepped_clock_advances_deterministically() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = SteppedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }

    #[test]
    fn stepped_clock_set_is_absolute() {
        let clock = SteppedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let later = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
