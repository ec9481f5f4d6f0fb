//! Process-wide time source, swappable for tests.
//!
//! The eviction cache is time-driven, so its correctness tests need to
//! fast-forward time. Everything that cares about "now" reads it through
//! the handle installed here instead of calling `Instant::now()` directly.

use std::sync::{Arc, LazyLock, RwLock};
use std::time::{Duration, Instant};

/// A source of monotonic time.
pub trait Clock: Send + Sync {
    /// The current reading.
    fn now(&self) -> Instant;

    /// Duration elapsed since `earlier`, saturating at zero.
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }

    /// The reading `d` from now.
    fn add(&self, d: Duration) -> Instant {
        self.now() + d
    }
}

/// Forwards to the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose reading is set explicitly, for deterministic tests.
#[derive(Debug)]
pub struct RewindableClock {
    at: RwLock<Instant>,
}

impl RewindableClock {
    pub fn new() -> Self {
        Self {
            at: RwLock::new(Instant::now()),
        }
    }

    /// Move the clock to `to`. Subsequent readers observe the new value.
    pub fn rewind(&self, to: Instant) {
        *self.at.write().expect("clock poisoned") = to;
    }
}

impl Default for RewindableClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RewindableClock {
    fn now(&self) -> Instant {
        *self.at.read().expect("clock poisoned")
    }
}

static CLOCK: LazyLock<RwLock<Arc<dyn Clock>>> =
    LazyLock::new(|| RwLock::new(Arc::new(SystemClock)));

/// Serializes tests that install a clock of their own; the handle is
/// process-wide, so such tests must not overlap.
#[cfg(test)]
pub(crate) static SWAP_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// The currently installed clock.
pub fn current() -> Arc<dyn Clock> {
    CLOCK.read().expect("clock poisoned").clone()
}

/// Install `clock` as the process-wide time source.
pub fn set(clock: Arc<dyn Clock>) {
    *CLOCK.write().expect("clock poisoned") = clock;
}

/// Shorthand for `current().now()`.
pub fn now() -> Instant {
    current().now()
}

/// Shorthand for `current().since(t)`.
pub fn since(t: Instant) -> Duration {
    current().since(t)
}
