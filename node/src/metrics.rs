//! Prometheus metrics for the node.
//!
//! [`LiquidMetrics`] owns a dedicated [`Registry`]; the daemon's `/metrics`
//! endpoint renders it with [`LiquidMetrics::encode_text`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::NodeError;

pub struct LiquidMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub resolutions_completed: IntCounter,
    pub resolutions_failed: IntCounter,
    pub tallies_completed: IntCounter,
    pub tallies_failed: IntCounter,
    /// Runs skipped because another process held the proposal lock.
    pub lock_contended: IntCounter,
    pub snapshots_created: IntCounter,
    pub snapshots_failed: IntCounter,
    pub snapshots_pruned: IntCounter,
    pub sweeps: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Deadline timers currently armed.
    pub armed_timers: IntGauge,
    /// Longest delegation chain seen by the most recent resolution.
    pub last_longest_chain: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    pub resolution_time_ms: Histogram,
}

impl LiquidMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), registry)
                .unwrap_or_else(|e| panic!("failed to register {name}: {e}"))
        };

        let resolutions_completed = counter(
            "liquid_resolutions_completed_total",
            "Delegation resolutions persisted with status completed",
        );
        let resolutions_failed = counter(
            "liquid_resolutions_failed_total",
            "Delegation resolutions that ended in error",
        );
        let tallies_completed = counter(
            "liquid_tallies_completed_total",
            "Tallies persisted with status completed",
        );
        let tallies_failed = counter("liquid_tallies_failed_total", "Tallies that ended in error");
        let lock_contended = counter(
            "liquid_lock_contended_total",
            "Proposal runs skipped because the lock was held elsewhere",
        );
        let snapshots_created = counter("liquid_snapshots_created_total", "Snapshots written");
        let snapshots_failed = counter(
            "liquid_snapshots_failed_total",
            "Snapshot attempts that failed",
        );
        let snapshots_pruned = counter(
            "liquid_snapshots_pruned_total",
            "Hourly snapshots deleted by retention",
        );
        let sweeps = counter("liquid_scheduler_sweeps_total", "Scheduler sweeps run");

        let armed_timers = register_int_gauge_with_registry!(
            Opts::new("liquid_armed_timers", "Deadline timers currently armed"),
            registry
        )
        .expect("failed to register armed_timers gauge");

        let last_longest_chain = register_int_gauge_with_registry!(
            Opts::new(
                "liquid_last_longest_chain",
                "Longest delegation chain in the most recent resolution"
            ),
            registry
        )
        .expect("failed to register last_longest_chain gauge");

        // 1 ms → ~16 s.
        let resolution_time_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "liquid_resolution_time_ms",
                "Delegation resolution time in milliseconds"
            )
            .buckets(
                prometheus::exponential_buckets(1.0, 2.0, 15)
                    .expect("static bucket layout is valid")
            ),
            registry
        )
        .expect("failed to register resolution_time_ms histogram");

        Self {
            registry,
            resolutions_completed,
            resolutions_failed,
            tallies_completed,
            tallies_failed,
            lock_contended,
            snapshots_created,
            snapshots_failed,
            snapshots_pruned,
            sweeps,
            armed_timers,
            last_longest_chain,
            resolution_time_ms,
        }
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| NodeError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| NodeError::Metrics(e.to_string()))
    }
}

/// Serve `GET /metrics` until `shutdown_rx` fires.
pub async fn serve_metrics(
    metrics: Arc<LiquidMetrics>,
    port: u16,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), NodeError> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "metrics endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<LiquidMetrics>>) -> Response {
    match metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

impl Default for LiquidMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        let metrics = LiquidMetrics::new();
        metrics.resolutions_completed.inc();
        metrics.armed_timers.set(3);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("liquid_resolutions_completed_total 1"));
        assert!(text.contains("liquid_armed_timers 3"));
    }

    #[tokio::test]
    async fn handler_renders_text_format() {
        let metrics = Arc::new(LiquidMetrics::new());
        metrics.sweeps.inc();
        let response = metrics_handler(State(metrics)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn registries_are_independent() {
        let a = LiquidMetrics::new();
        let b = LiquidMetrics::new();
        a.sweeps.inc();
        assert_eq!(b.sweeps.get(), 0);
    }
}
