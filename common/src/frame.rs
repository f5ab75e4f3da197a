//! Audio frame model for the receive media path.
//!
//! The RTP depacketizer produces [`AudioFrame`]s; the jitter buffer consumes
//! them and emits [`PlayoutFrame`]s to the playout thread. Wire parsing and
//! codec payload interpretation happen upstream, so by the time a frame gets
//! here it is already classified as voice, comfort noise, or empty.

/// Classification of a frame's payload, assigned by the depacketizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Regular voice frame.
    Normal,

    /// Silence-insertion-descriptor (comfort noise) frame sent during DTX.
    Sid,

    /// Frame with no usable payload.
    NoData,
}

/// Out-of-band signal attached to a frame.
///
/// `Refreshed` is a queue marker, not media: it tells the consumer side that
/// the synchronization source changed and carries the new SSRC. Everything
/// else is `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSubtype {
    /// Ordinary media frame.
    Undefined,

    /// SSRC change marker carrying the new SSRC.
    Refreshed(u32),
}

/// A depacketized audio frame as handed in by the network side.
///
/// Immutable once constructed. `rtp_timestamp` is in raw media-clock units
/// (160 per 20 ms frame at 8 kHz); `arrival_ms` is the producer's monotonic
/// millisecond clock at reception.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    // ---
    /// Out-of-band signal, `Undefined` for media frames.
    pub subtype: FrameSubtype,

    /// Encoded payload. May be empty for `NoData` frames.
    pub payload: Vec<u8>,

    /// RTP timestamp in media-clock units.
    pub rtp_timestamp: u32,

    /// RTP marker bit.
    pub mark: bool,

    /// 16-bit wrap-around sequence number.
    pub seq: u16,

    /// Payload classification.
    pub kind: FrameKind,

    /// Monotonic millisecond clock captured by the producer on reception.
    pub arrival_ms: u32,
}

impl AudioFrame {
    // ---
    /// Creates a regular media frame.
    pub fn new(
        seq: u16,
        rtp_timestamp: u32,
        mark: bool,
        kind: FrameKind,
        payload: Vec<u8>,
        arrival_ms: u32,
    ) -> Self {
        // ---
        Self {
            subtype: FrameSubtype::Undefined,
            payload,
            rtp_timestamp,
            mark,
            seq,
            kind,
            arrival_ms,
        }
    }

    /// Creates an SSRC refresh marker carrying the new SSRC.
    ///
    /// Markers have no payload and no meaningful media fields; they exist so
    /// the consumer observes the source change in queue order.
    pub fn refresh_marker(ssrc: u32, arrival_ms: u32) -> Self {
        // ---
        Self {
            subtype: FrameSubtype::Refreshed(ssrc),
            payload: Vec::new(),
            rtp_timestamp: 0,
            mark: false,
            seq: 0,
            kind: FrameKind::NoData,
            arrival_ms,
        }
    }

    /// Returns true for SSRC refresh markers.
    pub fn is_refresh_marker(&self) -> bool {
        // ---
        matches!(self.subtype, FrameSubtype::Refreshed(_))
    }
}

/// A frame released by the jitter buffer for decode and playback.
///
/// `timestamp_ms` is the millisecond-domain media timestamp the playout
/// scheduler runs on; for a preserved comfort-noise frame delivered into a
/// gap it is synthesized from the playout clock rather than taken from the
/// original packet.
#[derive(Debug, Clone)]
pub struct PlayoutFrame {
    // ---
    pub subtype: FrameSubtype,
    pub payload: Vec<u8>,
    pub timestamp_ms: u32,
    pub mark: bool,
    pub seq: u16,
    pub kind: FrameKind,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_media_frame_fields() {
        // ---
        let frame = AudioFrame::new(42, 1600, true, FrameKind::Normal, vec![1, 2, 3], 100);

        assert_eq!(frame.seq, 42);
        assert_eq!(frame.rtp_timestamp, 1600);
        assert!(frame.mark);
        assert_eq!(frame.kind, FrameKind::Normal);
        assert_eq!(frame.subtype, FrameSubtype::Undefined);
        assert!(!frame.is_refresh_marker());
    }

    #[test]
    fn test_refresh_marker_carries_ssrc() {
        // ---
        let marker = AudioFrame::refresh_marker(0xDEADBEEF, 50);

        assert!(marker.is_refresh_marker());
        assert!(marker.payload.is_empty());
        assert_eq!(marker.subtype, FrameSubtype::Refreshed(0xDEADBEEF));
    }
}
