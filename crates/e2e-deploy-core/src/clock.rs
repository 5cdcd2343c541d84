//! Time source for the blocking retry loops.
//!
//! The health verifier and the infra client's transient-error retry are the
//! only places that sleep. Both go through [`Clock`] so tests can substitute
//! [`FakeClock`] and run without wall-clock delays.

use std::time::{Duration, Instant};

pub trait Clock {
    /// Elapsed time since an arbitrary fixed origin.
    fn elapsed(&self) -> Duration;

    /// Block the calling thread for `d`.
    fn sleep(&self, d: Duration);
}

/// Real wall clock backed by `std::thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Virtual clock: `sleep` advances time instantly and records each call.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct FakeClock {
    inner: std::sync::Arc<std::sync::Mutex<FakeClockState>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct FakeClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }

    pub(crate) fn advance(&self, d: Duration) {
        self.inner.lock().unwrap().now += d;
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn elapsed(&self) -> Duration {
        self.inner.lock().unwrap().now
    }

    fn sleep(&self, d: Duration) {
        let mut s = self.inner.lock().unwrap();
        s.now += d;
        s.sleeps.push(d);
    }
}
