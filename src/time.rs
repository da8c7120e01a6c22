//! Time and Settling-Wait Abstraction
//!
//! The control loop spends most of its life waiting: a pneumatic regulator
//! needs tens of seconds to reach mechanical steady state after every
//! command, and no feedback read is meaningful before that. Putting the
//! clock behind a trait keeps those waits honest in production and
//! instantaneous in tests.

/// Milliseconds since an arbitrary monotonic origin.
pub type Timestamp = u64;

/// Monotonic clock plus blocking sleep.
pub trait Clock {
    /// Current timestamp in milliseconds.
    fn now_ms(&self) -> Timestamp;

    /// Block for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// Monotonic system clock (requires `std`).
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    /// Clock with its origin at construction time.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        self.origin.elapsed().as_millis() as Timestamp
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Simulated clock for tests: sleeping advances the timestamp instantly.
///
/// Atomic so it can be shared with the confirmatory-acquisition fork.
#[derive(Debug, Default)]
pub struct SimClock {
    now_ms: core::sync::atomic::AtomicU64,
}

impl SimClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock without sleeping.
    pub fn advance(&self, ms: u64) {
        self.now_ms
            .fetch_add(ms, core::sync::atomic::Ordering::Relaxed);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> Timestamp {
        self.now_ms.load(core::sync::atomic::Ordering::Relaxed)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}
