//! IMS voice receive path: adaptive jitter buffer and playout cadence.
//!
//! This library takes depacketized RTP audio frames from a network producer,
//! absorbs jitter, reordering, duplication, and DTX, and releases frames to
//! a consumer on a strict 20 ms cadence. Wire parsing, codec decode, and
//! hardware playback live outside; they meet this crate at [`AudioFrame`]
//! in and [`PlayoutFrame`] out, with per-frame telemetry on the side.

pub mod analyzer;
pub mod frame_store;
pub mod jitter_buffer;
pub mod playout;
pub mod stats;

pub use analyzer::{JitterAnalyzer, JitterOptions};
pub use frame_store::{FrameStore, StoredFrame};
pub use jitter_buffer::{
    AudioJitterBuffer, JitterBufferConfig, JitterBufferStatus, FRAME_INTERVAL_MS,
};
pub use playout::{FrameSink, PlayoutThread};
pub use stats::QualityTracker;

pub use ims_media_common::{
    AudioFrame, FrameKind, FrameSubtype, MediaEvent, PlayoutFrame, RxStatus, TelemetryQueue,
};
