//! Per-packet telemetry contract of the receive path.
//!
//! The jitter buffer records the fate of every frame it touches as
//! [`MediaEvent`]s on a [`TelemetryQueue`]. Downstream consumers (the
//! reception-quality tracker, an RTCP-XR reporter) drain the queue on their
//! own schedule. Publishing never blocks the media path: the queue is a
//! bounded ring that drops its oldest entry on overflow and counts the
//! drops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::frame::FrameKind;

/// Default queue capacity: several seconds of events at the nominal
/// 50 Hz × a few events per tick.
pub const DEFAULT_EVENT_CAPACITY: usize = 512;

/// Reception outcome of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Delivered to the playout side in order.
    Normal,

    /// Dropped as a duplicate of an already-seen sequence number.
    Duplicated,

    /// Arrived after its playout deadline and was dropped.
    Late,

    /// Dropped by a trim, clear, or forced catch-up.
    Discarded,
}

/// One telemetry event from the jitter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Emitted for every frame accepted by `add`, before queue insertion.
    PacketInfo {
        ssrc: u32,
        seq: u16,
        kind: FrameKind,
        /// Transit-time difference against the analyzer base, in ms.
        jitter_ms: i32,
        arrival_ms: u32,
    },

    /// The per-frame fate record; exactly one per enqueued frame.
    RxStatus {
        seq: u16,
        status: RxStatus,
        captured_at_ms: u32,
    },

    /// A run of sequence numbers that never arrived, reported at the
    /// delivery that revealed the gap.
    LossGap { first_seq: u16, count: u16 },

    /// Buffer depth at an accepted delivery, in milliseconds.
    BufferSize { current_ms: u32, max_ms: u32 },
}

/// Bounded, non-blocking event queue between the media path and its
/// observers.
///
/// `publish` is safe to call from under the jitter buffer lock: it takes the
/// queue's own short-lived mutex, never allocates beyond the ring, and never
/// waits for a consumer.
pub struct TelemetryQueue {
    // ---
    events: Mutex<VecDeque<MediaEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl TelemetryQueue {
    // ---
    /// Creates a queue with the default capacity.
    pub fn new() -> Self {
        // ---
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a queue holding at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        // ---
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends an event, evicting the oldest one if the ring is full.
    pub fn publish(&self, event: MediaEvent) {
        // ---
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if events.len() == self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        events.push_back(event);
    }

    /// Removes and returns all queued events, oldest first.
    pub fn drain(&self) -> Vec<MediaEvent> {
        // ---
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        events.drain(..).collect()
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        // ---
        match self.events.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Returns true when no events are queued.
    pub fn is_empty(&self) -> bool {
        // ---
        self.len() == 0
    }

    /// Total events evicted because the ring was full.
    pub fn dropped(&self) -> u64 {
        // ---
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TelemetryQueue {
    fn default() -> Self {
        // ---
        Self::new()
    }
}
