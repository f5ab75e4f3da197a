//! Receive-path demo binary.
//!
//! Drives a synthetic jittered voice stream through the jitter buffer and
//! playout thread, with reception-quality logging and an optional Prometheus
//! endpoint. No sockets are involved; the generated feed stands in for the
//! RTP depacketizer.

use anyhow::{Context, Result};
use clap::Parser;
use ims_media_common::{
    init_tracing, now_ms, AudioFrame, FrameKind, MetricsContext, MetricsServerConfig,
    TelemetryQueue,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use receiver::{AudioJitterBuffer, JitterBufferConfig, PlayoutFrame, PlayoutThread, QualityTracker};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Synthetic receive-path driver.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// How long to run, in seconds
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// Uniform network jitter applied to each packet, in milliseconds
    #[arg(short, long, default_value = "30")]
    jitter_ms: u64,

    /// Packet loss rate (0.0 to 1.0)
    #[arg(short, long, default_value = "0.02")]
    loss_rate: f64,

    /// Packet duplication rate (0.0 to 1.0)
    #[arg(long, default_value = "0.01")]
    duplicate_rate: f64,

    /// Fraction of the stream sent as comfort noise (0.0 to 1.0)
    #[arg(long, default_value = "0.2")]
    sid_rate: f64,

    /// Initial jitter buffer depth, in frames
    #[arg(long, default_value = "4")]
    init_depth: u32,

    /// RNG seed for reproducible runs
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Optional Prometheus scrape endpoint, e.g. 127.0.0.1:9100
    #[arg(long)]
    metrics_bind: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing()?;

    let args = Args::parse();
    info!("Starting receive-path demo");
    info!(
        "Feed: jitter ±{} ms, loss {:.1}%, dup {:.1}%, sid {:.1}%",
        args.jitter_ms,
        args.loss_rate * 100.0,
        args.duplicate_rate * 100.0,
        args.sid_rate * 100.0
    );

    let events = Arc::new(TelemetryQueue::new());
    let buffer = Arc::new(AudioJitterBuffer::new(
        JitterBufferConfig {
            init_depth: args.init_depth,
            ..JitterBufferConfig::default()
        },
        Arc::clone(&events),
    ));

    let metrics = match &args.metrics_bind {
        Some(bind) => {
            let ctx = MetricsContext::new("receiver").context("metrics registry init failed")?;
            ctx.spawn_metrics_server(MetricsServerConfig::new(*bind));
            info!("Serving /metrics on {}", bind);
            Some(ctx)
        }
        None => None,
    };

    let mut tracker = QualityTracker::new(Duration::from_secs(2));
    if let Some(ctx) = &metrics {
        tracker = tracker.with_metrics(ctx.clone());
    }

    // Playout side: count what would have gone to the decoder.
    let played = Arc::new(AtomicU64::new(0));
    let played_sink = Arc::clone(&played);
    let playout = PlayoutThread::spawn(Arc::clone(&buffer), move |_frame: PlayoutFrame| {
        played_sink.fetch_add(1, Ordering::Relaxed);
    })?;

    // Network side: one frame per 20 ms tick, delayed, lost, or duplicated
    // by the simulated network.
    let mut rng = StdRng::seed_from_u64(args.seed);
    let total_frames = args.duration_secs * 1000 / 20;
    let mut interval = tokio::time::interval(Duration::from_millis(20));
    let mut next_drain = tokio::time::interval(Duration::from_secs(1));

    for n in 0..total_frames {
        interval.tick().await;

        if rng.gen_bool(args.loss_rate) {
            continue;
        }

        let seq = n as u16;
        let kind = if rng.gen_bool(args.sid_rate) {
            FrameKind::Sid
        } else {
            FrameKind::Normal
        };
        let payload_len = if kind == FrameKind::Sid { 6 } else { 32 };
        let frame = AudioFrame::new(seq, n as u32 * 160, n == 0, kind, vec![0x55; payload_len], 0);

        let copies = if rng.gen_bool(args.duplicate_rate) { 2 } else { 1 };
        for _ in 0..copies {
            let delay = rng.gen_range(0..=args.jitter_ms);
            let buffer = Arc::clone(&buffer);
            let mut frame = frame.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let arrival = now_ms();
                frame.arrival_ms = arrival;
                buffer.add(frame, arrival);
            });
        }

        // Periodic telemetry drain, off the media path.
        if n % 50 == 49 {
            next_drain.tick().await;
            drain_telemetry(&events, &buffer, &mut tracker, metrics.as_ref());
        }
    }

    // Let the tail of the stream play out, then stop.
    tokio::time::sleep(Duration::from_millis(400)).await;
    playout.stop()?;
    drain_telemetry(&events, &buffer, &mut tracker, metrics.as_ref());

    tracker.log();
    info!(
        "Done: {} frames offered, {} played, {} still queued",
        total_frames,
        played.load(Ordering::Relaxed),
        buffer.count()
    );

    Ok(())
}

fn drain_telemetry(
    events: &TelemetryQueue,
    buffer: &AudioJitterBuffer,
    tracker: &mut QualityTracker,
    metrics: Option<&MetricsContext>,
) {
    // ---
    let batch = events.drain();
    tracker.record_batch(batch.iter());

    if let Some(ctx) = metrics {
        ctx.jitter_buffer_occupancy_frames.set(buffer.count() as i64);

        let dropped = events.dropped();
        let counted = ctx.telemetry_events_dropped_total.get();
        if dropped > counted {
            ctx.telemetry_events_dropped_total.inc_by(dropped - counted);
        }
    }
}
