//! Reception-quality tracking for the receive media path.
//!
//! Consumes the jitter buffer's telemetry events and keeps the counters a
//! quality reporter wants: per-fate frame counts, loss derived from gap
//! reports, and the current buffer depth. Designed to be fed from a drain
//! loop outside the media path and logged periodically for observability.

use ims_media_common::{MediaEvent, MetricsContext, RxStatus};
use std::time::{Duration, Instant};
use tracing::info;

/// Aggregated reception quality counters.
///
/// Optionally mirrors every update into a Prometheus [`MetricsContext`].
pub struct QualityTracker {
    // ---
    /// Packets seen at ingress (including empty and duplicate ones).
    pub packets_seen: u64,

    /// Frames delivered to the playout side.
    pub frames_delivered: u64,

    /// Frames dropped for arriving after their slot.
    pub frames_late: u64,

    /// Frames dropped as duplicates.
    pub frames_duplicated: u64,

    /// Frames discarded by trims and clears.
    pub frames_discarded: u64,

    /// Frames reported missing via gap events.
    pub frames_lost: u64,

    /// Gap events observed.
    pub loss_gaps: u64,

    /// Most recent transit-time difference sample, in ms.
    pub last_jitter_ms: i32,

    /// Most recent buffer depth report, in ms.
    pub depth_ms: u32,

    metrics: Option<MetricsContext>,

    start_time: Instant,
    last_log_time: Instant,
    log_interval: Duration,
}

impl QualityTracker {
    // ---
    /// Creates a tracker that logs a summary every `log_interval`.
    pub fn new(log_interval: Duration) -> Self {
        // ---
        let now = Instant::now();
        Self {
            packets_seen: 0,
            frames_delivered: 0,
            frames_late: 0,
            frames_duplicated: 0,
            frames_discarded: 0,
            frames_lost: 0,
            loss_gaps: 0,
            last_jitter_ms: 0,
            depth_ms: 0,
            metrics: None,
            start_time: now,
            last_log_time: now,
            log_interval,
        }
    }

    /// Mirrors counter updates into a Prometheus registry.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Folds one telemetry event into the counters.
    pub fn record(&mut self, event: &MediaEvent) {
        // ---
        match event {
            MediaEvent::PacketInfo { jitter_ms, .. } => {
                self.packets_seen += 1;
                self.last_jitter_ms = *jitter_ms;
            }
            MediaEvent::RxStatus { status, .. } => {
                match status {
                    RxStatus::Normal => self.frames_delivered += 1,
                    RxStatus::Late => self.frames_late += 1,
                    RxStatus::Duplicated => self.frames_duplicated += 1,
                    RxStatus::Discarded => self.frames_discarded += 1,
                }

                if let Some(metrics) = &self.metrics {
                    match status {
                        RxStatus::Normal => metrics.frames_delivered_total.inc(),
                        RxStatus::Late => metrics.frames_late_total.inc(),
                        RxStatus::Duplicated => metrics.frames_duplicated_total.inc(),
                        RxStatus::Discarded => metrics.frames_discarded_total.inc(),
                    }
                }
            }
            MediaEvent::LossGap { count, .. } => {
                self.loss_gaps += 1;
                self.frames_lost += *count as u64;

                if let Some(metrics) = &self.metrics {
                    metrics.loss_gaps_total.inc();
                    metrics.frames_lost_total.inc_by(*count as u64);
                }
            }
            MediaEvent::BufferSize { current_ms, .. } => {
                self.depth_ms = *current_ms;

                if let Some(metrics) = &self.metrics {
                    metrics.jitter_buffer_depth_ms.set(*current_ms as i64);
                }
            }
        }

        self.maybe_log();
    }

    /// Folds a drained batch of events into the counters.
    pub fn record_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a MediaEvent>) {
        // ---
        for event in events {
            self.record(event);
        }
    }

    /// Fraction of expected frames that never played, as a percentage.
    pub fn loss_percentage(&self) -> f64 {
        // ---
        let total = self.frames_delivered + self.frames_lost;
        if total == 0 {
            0.0
        } else {
            (self.frames_lost as f64 / total as f64) * 100.0
        }
    }

    /// Late drops relative to everything seen at ingress, as a percentage.
    pub fn late_percentage(&self) -> f64 {
        // ---
        if self.packets_seen == 0 {
            0.0
        } else {
            (self.frames_late as f64 / self.packets_seen as f64) * 100.0
        }
    }

    /// Returns runtime duration.
    pub fn runtime(&self) -> Duration {
        // ---
        self.start_time.elapsed()
    }

    /// Logs statistics if the interval has elapsed.
    fn maybe_log(&mut self) {
        // ---
        if self.last_log_time.elapsed() >= self.log_interval {
            self.log();
            self.last_log_time = Instant::now();
        }
    }

    /// Force log current statistics.
    pub fn log(&self) {
        // ---
        info!(
            "RX quality: {} seen, {} played, {:.2}% loss, {} late, {} dup, {} discarded, depth {} ms, jitter {} ms",
            self.packets_seen,
            self.frames_delivered,
            self.loss_percentage(),
            self.frames_late,
            self.frames_duplicated,
            self.frames_discarded,
            self.depth_ms,
            self.last_jitter_ms
        );
    }
}

impl Default for QualityTracker {
    fn default() -> Self {
        // ---
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use ims_media_common::FrameKind;

    fn rx(seq: u16, status: RxStatus) -> MediaEvent {
        MediaEvent::RxStatus {
            seq,
            status,
            captured_at_ms: 0,
        }
    }

    #[test]
    fn test_fate_counters() {
        // ---
        let mut tracker = QualityTracker::default();

        tracker.record(&rx(1, RxStatus::Normal));
        tracker.record(&rx(2, RxStatus::Normal));
        tracker.record(&rx(3, RxStatus::Late));
        tracker.record(&rx(4, RxStatus::Duplicated));
        tracker.record(&rx(5, RxStatus::Discarded));

        assert_eq!(tracker.frames_delivered, 2);
        assert_eq!(tracker.frames_late, 1);
        assert_eq!(tracker.frames_duplicated, 1);
        assert_eq!(tracker.frames_discarded, 1);
    }

    #[test]
    fn test_loss_from_gap_events() {
        // ---
        let mut tracker = QualityTracker::default();

        for seq in 0..6u16 {
            tracker.record(&rx(seq, RxStatus::Normal));
        }
        tracker.record(&MediaEvent::LossGap {
            first_seq: 6,
            count: 2,
        });

        assert_eq!(tracker.frames_lost, 2);
        assert_eq!(tracker.loss_gaps, 1);
        assert!((tracker.loss_percentage() - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_depth_and_jitter_follow_latest_events() {
        // ---
        let mut tracker = QualityTracker::default();

        tracker.record(&MediaEvent::PacketInfo {
            ssrc: 1,
            seq: 10,
            kind: FrameKind::Normal,
            jitter_ms: 12,
            arrival_ms: 0,
        });
        tracker.record(&MediaEvent::BufferSize {
            current_ms: 100,
            max_ms: 180,
        });

        assert_eq!(tracker.packets_seen, 1);
        assert_eq!(tracker.last_jitter_ms, 12);
        assert_eq!(tracker.depth_ms, 100);
    }

    #[test]
    fn test_metrics_mirroring() {
        // ---
        let metrics = MetricsContext::new("stats-test").expect("metrics init");
        let mut tracker = QualityTracker::default().with_metrics(metrics.clone());

        tracker.record(&rx(1, RxStatus::Normal));
        tracker.record(&rx(2, RxStatus::Late));
        tracker.record(&MediaEvent::LossGap {
            first_seq: 3,
            count: 4,
        });

        assert_eq!(metrics.frames_delivered_total.get(), 1);
        assert_eq!(metrics.frames_late_total.get(), 1);
        assert_eq!(metrics.frames_lost_total.get(), 4);
    }
}
