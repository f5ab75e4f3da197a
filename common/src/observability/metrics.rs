//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. The receive path updates
//! counters from drained telemetry events, never from inside the jitter
//! buffer lock.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles for the receive path.
///
/// A thin, explicit wrapper around the `prometheus` crate so hot-path
/// instrumentation is just counter increments.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Per-frame fate counters, mirroring the RxStatus taxonomy
    pub frames_delivered_total: IntCounter,
    pub frames_late_total: IntCounter,
    pub frames_duplicated_total: IntCounter,
    pub frames_discarded_total: IntCounter,

    // Loss reporting
    pub loss_gaps_total: IntCounter,
    pub frames_lost_total: IntCounter,

    // Buffer state gauges
    pub jitter_buffer_depth_ms: IntGauge,
    pub jitter_buffer_occupancy_frames: IntGauge,

    // Telemetry channel health
    pub telemetry_events_dropped_total: IntCounter,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("ims_media".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let frames_delivered_total = IntCounter::with_opts(Opts::new(
            "rx_frames_delivered_total",
            "Audio frames delivered to the playout side",
        ))?;
        let frames_late_total = IntCounter::with_opts(Opts::new(
            "rx_frames_late_total",
            "Audio frames dropped for arriving after their playout deadline",
        ))?;
        let frames_duplicated_total = IntCounter::with_opts(Opts::new(
            "rx_frames_duplicated_total",
            "Audio frames dropped as duplicates",
        ))?;
        let frames_discarded_total = IntCounter::with_opts(Opts::new(
            "rx_frames_discarded_total",
            "Audio frames discarded by trims, clears, and forced catch-up",
        ))?;

        let loss_gaps_total = IntCounter::with_opts(Opts::new(
            "rx_loss_gaps_total",
            "Sequence gaps observed at delivery",
        ))?;
        let frames_lost_total = IntCounter::with_opts(Opts::new(
            "rx_frames_lost_total",
            "Frames covered by observed sequence gaps",
        ))?;

        let jitter_buffer_depth_ms = IntGauge::with_opts(Opts::new(
            "jitter_buffer_depth_ms",
            "Current target jitter buffer depth in milliseconds",
        ))?;
        let jitter_buffer_occupancy_frames = IntGauge::with_opts(Opts::new(
            "jitter_buffer_occupancy_frames",
            "Frames currently queued in the jitter buffer",
        ))?;

        let telemetry_events_dropped_total = IntCounter::with_opts(Opts::new(
            "telemetry_events_dropped_total",
            "Telemetry events evicted because the queue was full",
        ))?;

        registry.register(Box::new(frames_delivered_total.clone()))?;
        registry.register(Box::new(frames_late_total.clone()))?;
        registry.register(Box::new(frames_duplicated_total.clone()))?;
        registry.register(Box::new(frames_discarded_total.clone()))?;
        registry.register(Box::new(loss_gaps_total.clone()))?;
        registry.register(Box::new(frames_lost_total.clone()))?;
        registry.register(Box::new(jitter_buffer_depth_ms.clone()))?;
        registry.register(Box::new(jitter_buffer_occupancy_frames.clone()))?;
        registry.register(Box::new(telemetry_events_dropped_total.clone()))?;

        Ok(Self {
            registry,
            frames_delivered_total,
            frames_late_total,
            frames_duplicated_total,
            frames_discarded_total,
            loss_gaps_total,
            frames_lost_total,
            jitter_buffer_depth_ms,
            jitter_buffer_occupancy_frames,
            telemetry_events_dropped_total,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Callers decide whether to run it; the media path works without one.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            let server = Server::bind(&cfg.bind).serve(make_svc);
            server.await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(resp);
            }

            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn metrics_context_gathers_something() {
        // ---
        let ctx = MetricsContext::new("test").expect("MetricsContext should init");
        let families = ctx.gather();
        assert!(!families.is_empty());
    }

    #[test]
    fn frame_fate_counters_increment_independently() {
        // ---
        let ctx = MetricsContext::new("test2").expect("MetricsContext should init");

        ctx.frames_delivered_total.inc();
        ctx.frames_delivered_total.inc();
        ctx.frames_late_total.inc();

        assert_eq!(ctx.frames_delivered_total.get(), 2);
        assert_eq!(ctx.frames_late_total.get(), 1);
        assert_eq!(ctx.frames_duplicated_total.get(), 0);
    }
}
