use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How the polling loops wait between passes.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock. Sleeping advances time instantly and is counted.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
    sleeps: AtomicU64,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Virtual time in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    /// Number of `sleep` calls so far.
    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}
