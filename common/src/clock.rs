//! Monotonic media clock.
//!
//! All timing in the receive path runs on a single process-wide monotonic
//! millisecond clock that starts at zero. Components never read wall-clock
//! time; tests drive the buffer with explicit timestamps instead of this
//! clock, which keeps the core deterministic.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    // ---
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds elapsed since the first call in this process.
///
/// Wraps at `u32::MAX` like the 32-bit tick counters it replaces; callers
/// compare instants with wrapping subtraction.
pub fn now_ms() -> u32 {
    // ---
    epoch().elapsed().as_millis() as u32
}

/// Microseconds elapsed since the first call in this process.
///
/// Used by the playout thread to sleep to the next exact tick boundary.
pub fn now_us() -> u64 {
    // ---
    epoch().elapsed().as_micros() as u64
}

/// Sleeps until the next multiple of `interval_us` on the monotonic clock.
///
/// Sleeping to the boundary instead of for a fixed duration keeps a periodic
/// loop from drifting when an iteration runs long.
pub fn sleep_to_next_tick(interval_us: u64) {
    // ---
    let now = now_us();
    let remainder = now % interval_us;
    let wait = interval_us - remainder;
    std::thread::sleep(Duration::from_micros(wait));
}
