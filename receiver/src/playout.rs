//! Playout cadence thread.
//!
//! Owns the 20 ms heartbeat of the receive path: one OS thread that wakes on
//! every tick boundary of the monotonic clock, asks the jitter buffer for a
//! frame, and hands whatever comes back to the caller's sink. The sink is
//! where decode and rendering live; this module only keeps time.
//!
//! The thread is the only component that sleeps. `get` itself never blocks,
//! so a tick costs microseconds and the loop can hold its cadence without
//! drift.

use crate::jitter_buffer::{AudioJitterBuffer, FRAME_INTERVAL_MS};
use anyhow::{anyhow, Context, Result};
use ims_media_common::{now_ms, sleep_to_next_tick, PlayoutFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long `stop` waits for the thread to exit before giving up.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Consumer of frames released by the jitter buffer.
///
/// Implemented for closures, so simple callers can pass `move |frame| ...`.
pub trait FrameSink: Send + 'static {
    fn on_frame(&mut self, frame: PlayoutFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(PlayoutFrame) + Send + 'static,
{
    fn on_frame(&mut self, frame: PlayoutFrame) {
        // ---
        self(frame)
    }
}

/// Handle to the running playout thread.
pub struct PlayoutThread {
    // ---
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlayoutThread {
    // ---
    /// Spawns the playout loop against `buffer`, delivering frames to `sink`.
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses to spawn the thread.
    pub fn spawn(buffer: Arc<AudioJitterBuffer>, mut sink: impl FrameSink) -> Result<Self> {
        // ---
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("audio-playout".into())
            .spawn(move || {
                // ---
                let interval_us = FRAME_INTERVAL_MS as u64 * 1000;
                info!("playout thread running at {} ms cadence", FRAME_INTERVAL_MS);

                loop {
                    sleep_to_next_tick(interval_us);

                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }

                    if let Some(frame) = buffer.get(now_ms()) {
                        sink.on_frame(frame);
                    }
                }

                info!("playout thread exited");
            })
            .context("failed to spawn playout thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the loop to exit and joins it with a bounded timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the thread fails to exit within the timeout or
    /// panicked.
    pub fn stop(mut self) -> Result<()> {
        // ---
        self.stop.store(true, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("playout thread still running after {:?}", JOIN_TIMEOUT);
                return Err(anyhow!(
                    "playout thread did not stop within {:?}",
                    JOIN_TIMEOUT
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        handle
            .join()
            .map_err(|_| anyhow!("playout thread panicked"))?;
        Ok(())
    }
}

impl Drop for PlayoutThread {
    fn drop(&mut self) {
        // ---
        // Signal without joining; dropping a handle must not block a caller
        // that never asked for an orderly stop.
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::jitter_buffer::JitterBufferConfig;
    use ims_media_common::{AudioFrame, FrameKind, TelemetryQueue};
    use std::sync::mpsc;

    fn feed_frames(buffer: &AudioJitterBuffer, count: u16) {
        // ---
        let base = now_ms();
        for k in 0..count {
            let frame = AudioFrame::new(
                k,
                k as u32 * 160,
                false,
                FrameKind::Normal,
                vec![0x42; 8],
                base,
            );
            buffer.add(frame, base);
        }
    }

    #[test]
    fn test_playout_delivers_in_order_then_stops() {
        // ---
        let events = Arc::new(TelemetryQueue::new());
        let buffer = Arc::new(AudioJitterBuffer::new(
            JitterBufferConfig::default(),
            events,
        ));
        feed_frames(&buffer, 10);

        let (tx, rx) = mpsc::channel();
        let playout = PlayoutThread::spawn(Arc::clone(&buffer), move |frame: PlayoutFrame| {
            let _ = tx.send(frame.seq);
        })
        .expect("spawn failed");

        std::thread::sleep(Duration::from_millis(300));
        playout.stop().expect("stop failed");

        let received: Vec<u16> = rx.try_iter().collect();
        assert!(!received.is_empty(), "no frames delivered in 300 ms");

        for pair in received.windows(2) {
            assert!(pair[1] > pair[0], "frames out of order: {:?}", received);
        }
    }

    #[test]
    fn test_stop_returns_promptly() {
        // ---
        let events = Arc::new(TelemetryQueue::new());
        let buffer = Arc::new(AudioJitterBuffer::new(
            JitterBufferConfig::default(),
            events,
        ));

        let playout =
            PlayoutThread::spawn(buffer, |_frame: PlayoutFrame| {}).expect("spawn failed");

        let started = Instant::now();
        playout.stop().expect("stop failed");
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
