// src/generic/clock.rs

use once_cell::sync::Lazy;
use std::time::Instant;

// All monotonic readings are measured from the first use in this process so
// the f64 stays small and precise.
static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic time source, in seconds. Injected so tests can drive protocol
/// time (resend timers, idle timeouts) without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        PROCESS_EPOCH.elapsed().as_secs_f64()
    }
}
