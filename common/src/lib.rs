//! Shared library for the IMS voice receive path.
//!
//! This crate is the **public gateway** for all shared functionality. Per EMBP,
//! downstream crates should import through `ims_media_common::*` exports and
//! should not drill into internal module structure.

mod clock;
mod frame;
mod observability;
mod seq;
mod telemetry;

pub use clock::{now_ms, now_us, sleep_to_next_tick};
pub use frame::{AudioFrame, FrameKind, FrameSubtype, PlayoutFrame};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use seq::{seq_after, seq_at_or_after, seq_gap, ts_at_or_after, TS_ROUND_GUARD_MS};
pub use telemetry::{MediaEvent, RxStatus, TelemetryQueue, DEFAULT_EVENT_CAPACITY};
