//! Transit-time statistics and buffer depth recommendation.
//!
//! The analyzer watches per-packet transit-time differences (TTD) against a
//! moving base packet and turns them into a recommended buffer depth in
//! frames. It is a pure value-in/value-out module: the jitter buffer owns
//! one, feeds it samples under its own lock, and hands in the current time
//! explicitly on every query.

use crate::jitter_buffer::FRAME_INTERVAL_MS;
use std::collections::VecDeque;
use tracing::debug;

/// Bounded TTD sample window: 2 s of audio at one sample per frame, well
/// past twice the deepest configurable buffer.
const TTD_WINDOW_CAPACITY: usize = 100;

/// Tuning knobs for the depth recommendation.
#[derive(Debug, Clone)]
pub struct JitterOptions {
    // ---
    /// Growth hysteresis in milliseconds of recommended depth above current.
    pub inc_threshold_ms: u32,

    /// Shrink hysteresis in milliseconds, also the debounce window between
    /// decreases and after a late arrival.
    pub dec_threshold_ms: u32,

    /// Frames added or removed per adjustment.
    pub step_size: u32,

    /// Weight of the TTD standard deviation in the depth statistic.
    pub z_value: f64,
}

impl Default for JitterOptions {
    fn default() -> Self {
        // ---
        Self {
            inc_threshold_ms: 40,
            dec_threshold_ms: 80,
            step_size: 1,
            z_value: 2.0,
        }
    }
}

/// Sliding-window jitter estimator with hysteresis on its output.
#[derive(Debug)]
pub struct JitterAnalyzer {
    // ---
    options: JitterOptions,
    min_depth: u32,
    max_depth: u32,

    /// Most punctual packet seen so far: (media ts_ms, arrival_ms).
    base: Option<(u32, u32)>,

    /// Recent TTD samples in milliseconds.
    window: VecDeque<i32>,

    last_decrease_ms: Option<u32>,
    last_late_ms: Option<u32>,
}

impl JitterAnalyzer {
    // ---
    pub fn new(min_depth: u32, max_depth: u32) -> Self {
        // ---
        Self {
            options: JitterOptions::default(),
            min_depth,
            max_depth,
            base: None,
            window: VecDeque::with_capacity(TTD_WINDOW_CAPACITY),
            last_decrease_ms: None,
            last_late_ms: None,
        }
    }

    /// Empties the sample window and clears the base.
    pub fn reset(&mut self) {
        // ---
        self.base = None;
        self.window.clear();
        self.last_decrease_ms = None;
        self.last_late_ms = None;
    }

    /// Clamps all subsequent depth outputs to `[min, max]`.
    pub fn set_bounds(&mut self, min_depth: u32, max_depth: u32) {
        // ---
        self.min_depth = min_depth;
        self.max_depth = max_depth;
    }

    pub fn set_options(&mut self, options: JitterOptions) {
        // ---
        self.options = options;
    }

    /// Records one transit-time sample and returns its TTD in milliseconds.
    ///
    /// Positive means this packet was more delayed than the base, negative
    /// less. A negative sample means the packet was more punctual than the
    /// base itself, so the base moves to it; the window then measures
    /// everything against the best transit seen.
    pub fn observe(&mut self, ts_ms: u32, arrival_ms: u32) -> i32 {
        // ---
        let (base_ts, base_arrival) = match self.base {
            Some(base) => base,
            None => {
                self.base = Some((ts_ms, arrival_ms));
                (ts_ms, arrival_ms)
            }
        };

        let ts_delta = ts_ms.wrapping_sub(base_ts) as i32;
        let arrival_delta = arrival_ms.wrapping_sub(base_arrival) as i32;
        let ttd = arrival_delta - ts_delta;

        if self.window.len() == TTD_WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(ttd);

        // The new packet's clock distance exceeded its arrival distance:
        // it is the most punctual packet seen, adopt it as base.
        if ts_delta > arrival_delta {
            self.base = Some((ts_ms, arrival_ms));
        }

        ttd
    }

    /// Marks a late-arrival drop, suppressing the next depth decrease for
    /// one debounce window.
    pub fn note_late_arrival(&mut self, now_ms: u32) {
        // ---
        self.last_late_ms = Some(now_ms);
    }

    /// Recommends the next buffer depth given the current one.
    ///
    /// Depth grows by `step_size` when the z-weighted TTD envelope exceeds
    /// the current depth by the growth hysteresis, shrinks by `step_size`
    /// when it undershoots by the shrink hysteresis and no decrease or late
    /// arrival happened within the debounce window, and holds otherwise.
    pub fn next_depth(&mut self, current: u32, now_ms: u32) -> u32 {
        // ---
        if self.window.is_empty() {
            return current.clamp(self.min_depth, self.max_depth);
        }

        let stat = self.envelope_ms();
        let recommended = (stat / FRAME_INTERVAL_MS as f64).ceil();

        let frame = FRAME_INTERVAL_MS as f64;
        let inc_limit = current as f64 + self.options.inc_threshold_ms as f64 / frame;
        let dec_limit = current as f64 - self.options.dec_threshold_ms as f64 / frame;

        let next = if recommended > inc_limit {
            let next = (current + self.options.step_size).min(self.max_depth);
            debug!("depth increase {} -> {} (envelope {:.1} ms)", current, next, stat);
            next
        } else if recommended < dec_limit && self.decrease_allowed(now_ms) {
            let next = current
                .saturating_sub(self.options.step_size)
                .max(self.min_depth);
            self.last_decrease_ms = Some(now_ms);
            debug!("depth decrease {} -> {} (envelope {:.1} ms)", current, next, stat);
            next
        } else {
            current
        };

        next.clamp(self.min_depth, self.max_depth)
    }

    /// z-weighted upper envelope of the TTD window, in milliseconds.
    fn envelope_ms(&self) -> f64 {
        // ---
        let n = self.window.len() as f64;
        let mean = self.window.iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        mean + self.options.z_value * variance.sqrt()
    }

    fn decrease_allowed(&self, now_ms: u32) -> bool {
        // ---
        let debounce = self.options.dec_threshold_ms;

        if let Some(last) = self.last_decrease_ms {
            if now_ms.wrapping_sub(last) < debounce {
                return false;
            }
        }

        if let Some(late) = self.last_late_ms {
            if now_ms.wrapping_sub(late) < debounce {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn analyzer() -> JitterAnalyzer {
        JitterAnalyzer::new(3, 9)
    }

    #[test]
    fn test_first_sample_has_zero_ttd() {
        // ---
        let mut a = analyzer();
        assert_eq!(a.observe(20, 100), 0);
    }

    #[test]
    fn test_steady_stream_holds_depth() {
        // ---
        let mut a = analyzer();

        for i in 0..20u32 {
            a.observe(20 + i * 20, i * 20);
        }

        assert_eq!(a.next_depth(4, 1000), 4);
    }

    #[test]
    fn test_base_chases_most_punctual_packet() {
        // ---
        let mut a = analyzer();

        a.observe(20, 100); // base
        let early = a.observe(40, 105); // 15 ms more punctual than base
        assert_eq!(early, -15);

        // Measured against the adopted base, not the stale one.
        let late = a.observe(60, 130);
        assert_eq!(late, 5);
    }

    #[test]
    fn test_bursty_delay_grows_depth_one_step() {
        // ---
        let mut a = analyzer();

        // Alternate punctual and ~150 ms delayed packets.
        for i in 0..10u32 {
            let ts = 20 + i * 20;
            let punctual = ts;
            let arrival = if i % 2 == 0 { punctual } else { punctual + 150 };
            a.observe(ts, arrival);
        }

        assert_eq!(a.next_depth(4, 500), 5);
    }

    #[test]
    fn test_growth_is_capped_at_max_depth() {
        // ---
        let mut a = analyzer();

        for i in 0..10u32 {
            let ts = 20 + i * 20;
            let arrival = if i % 2 == 0 { ts } else { ts + 400 };
            a.observe(ts, arrival);
        }

        assert_eq!(a.next_depth(9, 500), 9);
    }

    #[test]
    fn test_quiet_network_shrinks_depth_with_debounce() {
        // ---
        let mut a = analyzer();
        a.set_options(JitterOptions {
            dec_threshold_ms: 40,
            ..JitterOptions::default()
        });

        for i in 0..20u32 {
            a.observe(20 + i * 20, i * 20);
        }

        // First decrease goes through, an immediate retry is debounced,
        // and after the window another decrease lands.
        assert_eq!(a.next_depth(7, 1000), 6);
        assert_eq!(a.next_depth(6, 1010), 6);
        assert_eq!(a.next_depth(6, 1050), 5);
    }

    #[test]
    fn test_late_arrival_suppresses_decrease() {
        // ---
        let mut a = analyzer();
        a.set_options(JitterOptions {
            dec_threshold_ms: 40,
            ..JitterOptions::default()
        });

        for i in 0..20u32 {
            a.observe(20 + i * 20, i * 20);
        }

        a.note_late_arrival(1000);
        assert_eq!(a.next_depth(7, 1020), 7);

        // Once the window has passed, the decrease resumes.
        assert_eq!(a.next_depth(7, 1080), 6);
    }

    #[test]
    fn test_decrease_respects_min_depth() {
        // ---
        let mut a = analyzer();
        a.set_options(JitterOptions {
            dec_threshold_ms: 40,
            ..JitterOptions::default()
        });

        for i in 0..20u32 {
            a.observe(20 + i * 20, i * 20);
        }

        assert_eq!(a.next_depth(3, 1000), 3);
    }

    #[test]
    fn test_reset_forgets_samples() {
        // ---
        let mut a = analyzer();

        for i in 0..10u32 {
            let ts = 20 + i * 20;
            let arrival = if i % 2 == 0 { ts } else { ts + 400 };
            a.observe(ts, arrival);
        }

        a.reset();

        // No samples, no opinion: current depth comes straight back.
        assert_eq!(a.next_depth(4, 2000), 4);
    }
}
