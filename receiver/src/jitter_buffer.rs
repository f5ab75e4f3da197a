//! Adaptive receive jitter buffer for 20 ms voice frames.
//!
//! Sits between the RTP depacketizer and the playout thread. The network
//! side pushes frames with [`AudioJitterBuffer::add`] as they arrive; the
//! playout side calls [`AudioJitterBuffer::get`] exactly once per 20 ms tick
//! and plays whatever comes back. In between, the buffer reorders and
//! deduplicates by sequence number, drops what arrived too late, adapts its
//! depth to measured transit-time jitter, stretches and shrinks during
//! comfort-noise periods, and records the fate of every frame on the
//! telemetry queue.
//!
//! A single mutex covers the frame queue and all runtime state. Contention
//! is 50 Hz per side, so a coarse lock is the simple and correct choice;
//! nothing blocking runs under it.

use crate::analyzer::{JitterAnalyzer, JitterOptions};
use crate::frame_store::{FrameStore, StoredFrame};
use ims_media_common::{
    seq_at_or_after, seq_gap, ts_at_or_after, AudioFrame, FrameKind, FrameSubtype, MediaEvent,
    PlayoutFrame, RxStatus, TelemetryQueue, TS_ROUND_GUARD_MS,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Playout cadence and nominal frame duration, in milliseconds.
pub const FRAME_INTERVAL_MS: u32 = 20;

/// Head timestamps within this distance of the playout clock are treated as
/// the expected frame and the clock snaps to them.
const ALLOWABLE_ERROR_MS: u32 = 10;

/// Underrun duration that triggers the forced catch-up path.
const RESET_THRESHOLD_MS: u32 = 10_000;

/// Sequence gaps at or past this are treated as outliers, not loss.
const SEQ_OUTLIER_THRESHOLD: u16 = 3000;

/// Minimum interval between analyzer depth queries.
const JITTER_UPDATE_INTERVAL_MS: u32 = 100;

/// Absolute occupancy cap: 3 s of audio.
const MAX_QUEUE_SIZE: usize = 150;

/// Depth history cap: one hour of 20 ms samples.
const MAX_DEPTH_HISTORY: usize = 180_000;

/// Calls within this window of a (re)start trim to `max_depth` instead of
/// the absolute cap.
const STARTUP_TRIM_WINDOW_MS: u32 = 3000;

const DEFAULT_INIT_DEPTH: u32 = 4;
const DEFAULT_MIN_DEPTH: u32 = 3;
const DEFAULT_MAX_DEPTH: u32 = 9;

/// Jitter buffer configuration.
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    // ---
    /// Target depth, in frames, to accumulate before playout starts.
    pub init_depth: u32,

    /// Lower bound for the adaptive depth.
    pub min_depth: u32,

    /// Upper bound for the adaptive depth.
    pub max_depth: u32,

    /// Media clock rate in kHz; 8 for narrowband, 16 for wideband.
    pub clock_rate_khz: u32,

    /// Skip comfort-noise frames when sampling transit-time jitter.
    pub ignore_sid_for_jitter: bool,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        // ---
        Self {
            init_depth: DEFAULT_INIT_DEPTH,
            min_depth: DEFAULT_MIN_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
            clock_rate_khz: 8,
            ignore_sid_for_jitter: false,
        }
    }
}

/// Snapshot of buffer state for logging, metrics, and tests.
#[derive(Debug, Clone)]
pub struct JitterBufferStatus {
    // ---
    pub queued_frames: usize,
    pub current_depth: u32,
    pub playout_ts_ms: u32,
    pub waiting: bool,
    pub dtx_active: bool,
    pub consecutive_sid: u32,
    pub average_depth: f64,
}

/// Sequence-position summary of the head frame, copied out so the borrow on
/// the store ends before state is mutated.
#[derive(Debug, Clone, Copy)]
struct HeadInfo {
    // ---
    seq: u16,
    ts_ms: u32,
    kind: FrameKind,
    marker: bool,
}

/// Everything behind the buffer lock.
struct BufferState {
    // ---
    store: FrameStore,
    analyzer: JitterAnalyzer,

    init_depth: u32,
    min_depth: u32,
    max_depth: u32,
    clock_rate_khz: u32,
    ignore_sid_for_jitter: bool,

    current_depth: u32,
    next_depth: u32,

    /// Signed count of frames the buffer still wants to grow (+) or shrink
    /// (-) by; applied one frame at a time during comfort-noise periods.
    pending_delay_adjustment: i32,

    /// True until the initial fill target is reached.
    waiting: bool,
    first_frame_delivered: bool,

    /// Millisecond media timestamp the next tick expects to emit.
    playout_ts: u32,
    last_delivered_seq: u16,

    dtx_active: bool,
    consecutive_sid: u32,

    start_time_ms: u32,
    last_time_ms: u32,

    cannot_get_count: u32,
    delete_count: u32,
    check_count: u32,
    enforce_update: bool,

    /// One comfort-noise frame rescued from the late-discard path, replayed
    /// into the next silent gap.
    preserved_sid: Option<StoredFrame>,

    ssrc: u32,
    depth_history: VecDeque<u32>,
}

impl BufferState {
    // ---
    fn head(&self) -> Option<HeadInfo> {
        // ---
        self.store.peek_first().map(|entry| HeadInfo {
            seq: entry.frame.seq,
            ts_ms: entry.ts_ms,
            kind: entry.frame.kind,
            marker: entry.frame.is_refresh_marker(),
        })
    }

    /// Resets runtime state for a fresh stream. Leaves the frame queue, the
    /// configured depths, and the playout timestamp alone; the next fill or
    /// resync re-seeds the clock.
    fn reset_runtime(&mut self, now_ms: u32) {
        // ---
        debug!("jitter buffer reset");
        self.last_delivered_seq = 0;
        self.first_frame_delivered = false;
        self.waiting = true;
        self.next_depth = self.current_depth;
        self.pending_delay_adjustment = 0;
        self.dtx_active = false;
        self.consecutive_sid = 0;
        self.delete_count = 0;
        self.cannot_get_count = 0;
        self.check_count = 0;
        self.enforce_update = false;
        self.preserved_sid = None;
        self.start_time_ms = now_ms;
    }

    /// Empties the queue, recording each discarded voice frame.
    fn clear_store(&mut self, events: &TelemetryQueue, at_ms: u32) {
        // ---
        while let Some(popped) = self.store.pop_first() {
            if popped.frame.kind != FrameKind::Sid && !popped.frame.is_refresh_marker() {
                events.publish(MediaEvent::RxStatus {
                    seq: popped.frame.seq,
                    status: RxStatus::Discarded,
                    captured_at_ms: at_ms,
                });
            }
        }
    }

    /// Drops frames from the head until at most `spare_frames` remain, then
    /// re-seeds the playout clock from the surviving head if anything was
    /// dropped or the buffer is still filling.
    fn resync(&mut self, spare_frames: usize, events: &TelemetryQueue, at_ms: u32) {
        // ---
        let mut deleted = false;

        while self.store.len() > spare_frames {
            let Some(popped) = self.store.pop_first() else {
                break;
            };

            debug!(
                "resync drop seq [{}], queue [{}], spare [{}]",
                popped.frame.seq,
                self.store.len(),
                spare_frames
            );

            if popped.frame.kind != FrameKind::Sid && !popped.frame.is_refresh_marker() {
                events.publish(MediaEvent::RxStatus {
                    seq: popped.frame.seq,
                    status: RxStatus::Discarded,
                    captured_at_ms: at_ms,
                });
            }

            if !self.waiting {
                self.last_delivered_seq = popped.frame.seq;
            }

            deleted = true;
        }

        if deleted || self.waiting {
            if let Some(head) = self.store.peek_first() {
                self.playout_ts = head.ts_ms;
            }
        }
    }
}

/// Thread-safe adaptive jitter buffer.
///
/// The network thread calls [`add`](Self::add), the playout thread calls
/// [`get`](Self::get) every 20 ms, and session control may call
/// [`reset`](Self::reset) / [`clear_buffer`](Self::clear_buffer) or adjust
/// configuration at any time. All failure modes are absorbed internally and
/// surface only through telemetry and `get` returning `None`.
pub struct AudioJitterBuffer {
    // ---
    state: Mutex<BufferState>,
    events: Arc<TelemetryQueue>,
}

impl AudioJitterBuffer {
    // ---
    pub fn new(config: JitterBufferConfig, events: Arc<TelemetryQueue>) -> Self {
        // ---
        let min_depth = config.min_depth.max(1);
        let max_depth = config.max_depth.max(min_depth);
        let init_depth = config.init_depth.clamp(min_depth, max_depth);

        let state = BufferState {
            store: FrameStore::new(),
            analyzer: JitterAnalyzer::new(min_depth, max_depth),
            init_depth,
            min_depth,
            max_depth,
            clock_rate_khz: config.clock_rate_khz.max(1),
            ignore_sid_for_jitter: config.ignore_sid_for_jitter,
            current_depth: init_depth,
            next_depth: init_depth,
            pending_delay_adjustment: 0,
            waiting: true,
            first_frame_delivered: false,
            playout_ts: 0,
            last_delivered_seq: 0,
            dtx_active: false,
            consecutive_sid: 0,
            start_time_ms: 0,
            last_time_ms: 0,
            cannot_get_count: 0,
            delete_count: 0,
            check_count: 0,
            enforce_update: false,
            preserved_sid: None,
            ssrc: 0,
            depth_history: VecDeque::new(),
        };

        Self {
            state: Mutex::new(state),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // ---
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of frames currently queued.
    pub fn count(&self) -> usize {
        // ---
        self.lock().store.len()
    }

    /// Snapshot of runtime state.
    pub fn status(&self) -> JitterBufferStatus {
        // ---
        let state = self.lock();

        let average_depth = if state.depth_history.is_empty() {
            state.current_depth as f64
        } else {
            state.depth_history.iter().map(|&d| d as f64).sum::<f64>()
                / state.depth_history.len() as f64
        };

        JitterBufferStatus {
            queued_frames: state.store.len(),
            current_depth: state.current_depth,
            playout_ts_ms: state.playout_ts,
            waiting: state.waiting,
            dtx_active: state.dtx_active,
            consecutive_sid: state.consecutive_sid,
            average_depth,
        }
    }

    /// Reconfigures depth bounds. Zero leaves a bound unchanged; the initial
    /// depth is clamped into the resulting range and becomes the current
    /// target.
    pub fn set_buffer_size(&self, init: u32, min: u32, max: u32) {
        // ---
        let mut state = self.lock();

        if min > 0 {
            state.min_depth = min;
        }

        if max > 0 {
            state.max_depth = max.max(state.min_depth);
        }

        if init > 0 {
            let init = init.clamp(state.min_depth, state.max_depth);
            state.init_depth = init;
            state.current_depth = init;
            state.next_depth = init;
        }

        let (min_depth, max_depth) = (state.min_depth, state.max_depth);
        state.analyzer.set_bounds(min_depth, max_depth);

        info!(
            "buffer size set, init [{}], min [{}], max [{}]",
            state.init_depth, state.min_depth, state.max_depth
        );
    }

    /// Replaces the analyzer tuning knobs.
    pub fn set_jitter_options(&self, options: JitterOptions) {
        // ---
        self.lock().analyzer.set_options(options);
    }

    /// Controls whether comfort-noise frames feed the jitter estimate.
    pub fn set_ignore_sid_for_jitter(&self, ignore: bool) {
        // ---
        self.lock().ignore_sid_for_jitter = ignore;
    }

    /// Resets runtime state without touching queued frames.
    pub fn reset(&self) {
        // ---
        let mut state = self.lock();
        let at_ms = state.last_time_ms;
        state.reset_runtime(at_ms);
    }

    /// Empties the queue, recording each dropped voice frame as discarded.
    pub fn clear_buffer(&self) {
        // ---
        let mut state = self.lock();
        let at_ms = state.last_time_ms;
        debug!("clearing {} queued frames", state.store.len());
        state.clear_store(&self.events, at_ms);
    }

    /// Ingress: accepts one depacketized frame from the network side.
    ///
    /// Records the transit-time sample, publishes the per-packet info event,
    /// and files the frame at its sequence position. Frames with empty
    /// payloads are reported but not queued. Never blocks on queue space.
    pub fn add(&self, frame: AudioFrame, arrival_ms: u32) {
        // ---
        let mut state = self.lock();
        state.last_time_ms = arrival_ms;

        // An SSRC change restarts jitter tracking immediately and leaves a
        // marker in the queue so egress sees the change in stream order.
        if let FrameSubtype::Refreshed(ssrc) = frame.subtype {
            state.ssrc = ssrc;

            let (min_depth, max_depth) = (state.min_depth, state.max_depth);
            state.analyzer.reset();
            state.analyzer.set_bounds(min_depth, max_depth);
            state.start_time_ms = arrival_ms;
            state.cannot_get_count = 0;
            state.delete_count = 0;
            state.check_count = 0;

            state.store.append(StoredFrame { frame, ts_ms: 0 });
            info!("ssrc refresh queued, ssrc [{:#010x}]", ssrc);
            return;
        }

        // Playout kept starving while traffic continued: the stream moved
        // somewhere we cannot follow, so restart from this packet.
        if state.cannot_get_count > state.max_depth {
            warn!(
                "underrun persisted across {} ticks, clearing {} frames",
                state.cannot_get_count,
                state.store.len()
            );
            state.clear_store(&self.events, arrival_ms);
            state.reset_runtime(arrival_ms);
        }

        let ts_ms = frame.rtp_timestamp / state.clock_rate_khz;

        let jitter_ms = if state.ignore_sid_for_jitter && frame.kind == FrameKind::Sid {
            0
        } else {
            state.analyzer.observe(ts_ms, arrival_ms)
        };

        let reported_kind = if frame.payload.is_empty() {
            FrameKind::NoData
        } else {
            frame.kind
        };

        self.events.publish(MediaEvent::PacketInfo {
            ssrc: state.ssrc,
            seq: frame.seq,
            kind: reported_kind,
            jitter_ms,
            arrival_ms,
        });

        if frame.payload.is_empty() {
            trace!("seq [{}] carries no payload, not queued", frame.seq);
            return;
        }

        let seq = frame.seq;

        trace!(
            "add seq [{}], ts [{}], jitter [{}], queue [{}]",
            seq,
            ts_ms,
            jitter_ms,
            state.store.len() + 1
        );

        if !state.store.insert_sorted(StoredFrame { frame, ts_ms }) {
            debug!("duplicate seq [{}] dropped at ingress", seq);
            self.events.publish(MediaEvent::RxStatus {
                seq,
                status: RxStatus::Duplicated,
                captured_at_ms: arrival_ms,
            });
        }
    }

    /// Egress: called by the playout thread once per 20 ms tick.
    ///
    /// Returns the frame whose media timestamp matches the playout clock,
    /// or `None` when nothing should be played this tick. The playout clock
    /// advances by one frame interval per call except while the buffer is
    /// filling or deliberately stretching during comfort noise.
    pub fn get(&self, now_ms: u32) -> Option<PlayoutFrame> {
        // ---
        let mut state = self.lock();
        state.last_time_ms = now_ms;
        state.check_count += 1;
        let mut force_play = false;

        // An SSRC refresh marker at the head restarts the stream state. If
        // playout was already running, resume directly on the new stream's
        // first frame instead of waiting for a full refill.
        if state.head().is_some_and(|h| h.marker) {
            let was_waiting = state.waiting;
            state.reset_runtime(now_ms);
            let _ = state.store.pop_first();
            info!("ssrc refresh reached playout, ssrc [{:#010x}]", state.ssrc);

            match state.head() {
                Some(next) if !next.marker && !was_waiting => {
                    state.playout_ts = next.ts_ms;
                    state.waiting = false;
                }
                Some(_) => {}
                None => debug!("ssrc refresh with an empty queue"),
            }
        }

        // Query the analyzer at a bounded cadence, or immediately when a
        // comfort-noise period is about to end; depth changes are applied
        // as a pending adjustment during silence.
        let head_kind = state.head().map(|h| h.kind);
        if !state.waiting
            && ((state.dtx_active && head_kind.is_some_and(|k| k != FrameKind::Sid))
                || state.check_count * FRAME_INTERVAL_MS > JITTER_UPDATE_INTERVAL_MS)
        {
            let current = state.current_depth;
            let next = state.analyzer.next_depth(current, now_ms);
            let delta = next as i32 - current as i32;
            state.current_depth = next;
            state.next_depth = next;
            state.pending_delay_adjustment += delta;
            state.check_count = 0;
        }

        let depth_sample = state.current_depth;
        state.depth_history.push_back(depth_sample);
        if state.depth_history.len() > MAX_DEPTH_HISTORY {
            state.depth_history.pop_front();
        }

        // Grow the buffer by holding playout for one tick while the network
        // keeps feeding; only comfort-noise periods absorb the stall.
        if !state.waiting && state.dtx_active && state.pending_delay_adjustment > 0 {
            state.pending_delay_adjustment -= 1;
            debug!(
                "dtx stretch toward depth [{}], pending [{}], queue [{}]",
                state.next_depth,
                state.pending_delay_adjustment,
                state.store.len()
            );
            return None;
        }

        // Shrink it by skipping one silence frame of playout.
        if !state.waiting
            && state.head().is_some_and(|h| h.kind == FrameKind::Sid)
            && state.pending_delay_adjustment < 0
        {
            state.pending_delay_adjustment += 1;
            state.playout_ts = state.playout_ts.wrapping_add(FRAME_INTERVAL_MS);
            debug!(
                "dtx contract, pending [{}], queue [{}]",
                state.pending_delay_adjustment,
                state.store.len()
            );
        }

        // Ten seconds without a deliverable frame: force a catch-up pass.
        if state.cannot_get_count * FRAME_INTERVAL_MS > RESET_THRESHOLD_MS {
            debug!(
                "underrun threshold breached, enforcing update, deletes so far [{}]",
                state.delete_count
            );
            state.enforce_update = true;
            state.waiting = false;
            state.cannot_get_count = 0;
        }

        if state.store.is_empty() {
            trace!("queue empty at playout ts [{}]", state.playout_ts);
            if !state.waiting {
                state.playout_ts = state.playout_ts.wrapping_add(FRAME_INTERVAL_MS);
            }
            return None;
        }

        // Hold playout until the initial fill time has passed, then seed the
        // playout clock from the head.
        if state.waiting {
            if now_ms.wrapping_sub(state.start_time_ms)
                < state.current_depth * FRAME_INTERVAL_MS
            {
                trace!(
                    "filling, queue [{}], depth [{}]",
                    state.store.len(),
                    state.current_depth
                );
                return None;
            }

            let spare = state.current_depth as usize + 1;
            state.resync(spare, &self.events, now_ms);
            state.waiting = false;
        }

        // A head we already played is a duplicate the ingress scan could not
        // catch (its twin was delivered before it arrived).
        if let Some(head) = state.head() {
            if state.first_frame_delivered && head.seq == state.last_delivered_seq {
                debug!("duplicate at head, seq [{}]", head.seq);
                self.events.publish(MediaEvent::RxStatus {
                    seq: head.seq,
                    status: RxStatus::Duplicated,
                    captured_at_ms: now_ms,
                });
                let _ = state.store.pop_first();
                state.delete_count += 1;
            }
        }

        // Bound the queue: tightly right after a (re)start, loosely later.
        if now_ms.wrapping_sub(state.start_time_ms) < STARTUP_TRIM_WINDOW_MS {
            let spare = state.max_depth as usize;
            state.resync(spare, &self.events, now_ms);
        } else {
            state.resync(MAX_QUEUE_SIZE, &self.events, now_ms);
        }

        // Snap the playout clock onto a head that is nearly but not exactly
        // aligned, so sub-frame offsets do not turn into drops.
        if let Some(head) = state.head() {
            if head.ts_ms != state.playout_ts
                && state.playout_ts.wrapping_sub(ALLOWABLE_ERROR_MS) < head.ts_ms
                && head.ts_ms < state.playout_ts.wrapping_add(ALLOWABLE_ERROR_MS)
            {
                trace!("playout ts snap [{}] -> [{}]", state.playout_ts, head.ts_ms);
                state.playout_ts = head.ts_ms;
            }
        }

        // Everything behind the playout clock missed its slot. Voice frames
        // are dropped as late; the newest silence frame is kept aside to
        // patch a comfort-noise gap later.
        while let Some(head) = state.head() {
            if ts_at_or_after(head.ts_ms, state.playout_ts) {
                break;
            }

            state.dtx_active = head.kind == FrameKind::Sid;

            if seq_at_or_after(head.seq, state.last_delivered_seq) {
                state.last_delivered_seq = head.seq;
            }

            let Some(popped) = state.store.pop_first() else {
                break;
            };

            if popped.frame.kind == FrameKind::Sid {
                state.preserved_sid = Some(popped);
            } else {
                debug!(
                    "late arrival dropped, seq [{}], ts [{}], playout ts [{}]",
                    popped.frame.seq, popped.ts_ms, state.playout_ts
                );
                self.events.publish(MediaEvent::RxStatus {
                    seq: popped.frame.seq,
                    status: RxStatus::Late,
                    captured_at_ms: now_ms,
                });
                state.delete_count += 1;
            }

            state.analyzer.note_late_arrival(now_ms);
        }

        // The head jumped far ahead of the clock: the sender restarted its
        // timestamps, play through instead of stalling for hours.
        if let Some(head) = state.head() {
            if head.ts_ms.wrapping_sub(state.playout_ts) > TS_ROUND_GUARD_MS {
                debug!(
                    "timestamp jump, seq [{}], ts [{}], playout ts [{}]",
                    head.seq, head.ts_ms, state.playout_ts
                );
                force_play = true;
            }
        }

        // Forced catch-up: shed everything above the target depth, then let
        // the queue restack before resuming.
        if state.enforce_update {
            while state.store.len() > state.current_depth as usize + 1 {
                let Some(popped) = state.store.pop_first() else {
                    break;
                };

                state.dtx_active = popped.frame.kind == FrameKind::Sid;

                if seq_at_or_after(popped.frame.seq, state.last_delivered_seq) {
                    state.last_delivered_seq = popped.frame.seq;
                }

                if popped.frame.kind != FrameKind::Sid {
                    self.events.publish(MediaEvent::RxStatus {
                        seq: popped.frame.seq,
                        status: RxStatus::Discarded,
                        captured_at_ms: now_ms,
                    });
                }
            }

            state.enforce_update = false;

            let occupancy = state.store.len();
            if occupancy < 2
                || (occupancy as u32) < state.current_depth.saturating_sub(state.min_depth)
            {
                trace!("waiting for the queue to restack, queue [{}]", occupancy);
                return None;
            }
        }

        // Deliver when the head matches the clock, when a jump forces play,
        // or when the millisecond timestamp itself wrapped.
        if let Some(head) = state.head() {
            if head.ts_ms == state.playout_ts
                || force_play
                || (head.ts_ms < TS_ROUND_GUARD_MS && state.playout_ts > 0xFFFF)
            {
                if let Some(entry) = state.store.pop_first() {
                    return Some(self.deliver(&mut state, entry, now_ms));
                }
            }
        }

        // Nothing matched this tick.
        if !state.dtx_active {
            state.cannot_get_count += 1;
        }

        if let Some(preserved) = state.preserved_sid.take() {
            // A silence frame rescued earlier covers this gap; its timestamp
            // is synthesized from the playout clock.
            let ts_ms = state.playout_ts;
            state.playout_ts = state.playout_ts.wrapping_add(FRAME_INTERVAL_MS);
            state.dtx_active = true;
            state.consecutive_sid += 1;

            debug!(
                "preserved sid seq [{}] fills gap at playout ts [{}]",
                preserved.frame.seq, ts_ms
            );
            self.events.publish(MediaEvent::RxStatus {
                seq: preserved.frame.seq,
                status: RxStatus::Normal,
                captured_at_ms: now_ms,
            });
            self.publish_buffer_size(&state);

            let frame = preserved.frame;
            return Some(PlayoutFrame {
                subtype: frame.subtype,
                payload: frame.payload,
                timestamp_ms: ts_ms,
                mark: frame.mark,
                seq: frame.seq,
                kind: frame.kind,
            });
        }

        trace!(
            "no frame for playout ts [{}], queue [{}]",
            state.playout_ts,
            state.store.len()
        );
        state.playout_ts = state.playout_ts.wrapping_add(FRAME_INTERVAL_MS);
        None
    }

    /// Delivery bookkeeping for a head frame that matched the clock.
    fn deliver(
        &self,
        state: &mut BufferState,
        entry: StoredFrame,
        now_ms: u32,
    ) -> PlayoutFrame {
        // ---
        let frame = entry.frame;
        let ts_ms = entry.ts_ms;

        if frame.kind == FrameKind::Sid {
            state.consecutive_sid += 1;
            state.dtx_active = true;
        } else {
            state.consecutive_sid = 0;
            state.dtx_active = false;
        }

        if state.first_frame_delivered {
            let gap = seq_gap(frame.seq, state.last_delivered_seq);

            if gap > 1 && gap < SEQ_OUTLIER_THRESHOLD {
                self.events.publish(MediaEvent::LossGap {
                    first_seq: state.last_delivered_seq.wrapping_add(1),
                    count: gap - 1,
                });
            }
        }

        trace!(
            "deliver seq [{}], ts [{}], dtx [{}], queue [{}]",
            frame.seq,
            ts_ms,
            state.dtx_active,
            state.store.len()
        );

        state.playout_ts = ts_ms.wrapping_add(FRAME_INTERVAL_MS);
        state.first_frame_delivered = true;
        state.last_delivered_seq = frame.seq;
        state.cannot_get_count = 0;

        self.events.publish(MediaEvent::RxStatus {
            seq: frame.seq,
            status: RxStatus::Normal,
            captured_at_ms: now_ms,
        });
        self.publish_buffer_size(&state);

        PlayoutFrame {
            subtype: frame.subtype,
            payload: frame.payload,
            timestamp_ms: ts_ms,
            mark: frame.mark,
            seq: frame.seq,
            kind: frame.kind,
        }
    }

    fn publish_buffer_size(&self, state: &BufferState) {
        // ---
        self.events.publish(MediaEvent::BufferSize {
            current_ms: state.current_depth * FRAME_INTERVAL_MS,
            max_ms: state.max_depth * FRAME_INTERVAL_MS,
        });
    }
}
