//! # Prometheus Metrics
//!
//! Operational metrics for the CMA, served at `/metrics` on the metrics
//! port alongside a `/health` probe. All metrics live in a dedicated
//! [`prometheus::Registry`] with the `cma` prefix.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use cma_protocol::network::{DispatchStats, ReadinessReport};
use cma_protocol::registry::NodeEvent;
use cma_protocol::CmaContext;

#[derive(Clone)]
pub struct CmaMetrics {
    registry: Registry,
    /// Frame sets that completed the commit protocol.
    pub messages_dispatched_total: IntCounter,
    /// Frame sets refused by the encryption gate.
    pub messages_rejected_total: IntCounter,
    /// Frame sets that went to the default handler.
    pub messages_unhandled_total: IntCounter,
    pub handler_failures_total: IntCounter,
    pub drones_known: IntGauge,
    pub drones_up: IntGauge,
    pub ring_size: IntGaugeVec,
    pub scheduler_depth: IntGauge,
    pub events_total: IntCounterVec,
    pub network_commit_seconds: Histogram,
}

fn register<M>(registry: &Registry, metric: M) -> prometheus::Result<M>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl CmaMetrics {
    /// Creates and registers every metric. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("cma".into()), None)?;

        let messages_dispatched_total = register(
            &registry,
            IntCounter::new("messages_dispatched_total", "Frame sets processed and committed")?,
        )?;
        let messages_rejected_total = register(
            &registry,
            IntCounter::new(
                "messages_rejected_total",
                "Frame sets refused for lacking a sender identity",
            )?,
        )?;
        let messages_unhandled_total = register(
            &registry,
            IntCounter::new("messages_unhandled_total", "Frame sets with no registered handler")?,
        )?;
        let handler_failures_total = register(
            &registry,
            IntCounter::new("handler_failures_total", "Handler failures (each one is fatal)")?,
        )?;
        let drones_known = register(
            &registry,
            IntGauge::new("drones_known", "Drones in the registry")?,
        )?;
        let drones_up = register(&registry, IntGauge::new("drones_up", "Drones currently up")?)?;
        let ring_size = register(
            &registry,
            IntGaugeVec::new(Opts::new("ring_size", "Members per heartbeat ring"), &["ring"])?,
        )?;
        let scheduler_depth = register(
            &registry,
            IntGauge::new("scheduler_depth", "Frame sets waiting in the scheduler")?,
        )?;
        let events_total = register(
            &registry,
            IntCounterVec::new(Opts::new("events_total", "Drone events emitted"), &["kind"])?,
        )?;
        let network_commit_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "network_commit_seconds",
                    "Time spent sending a message's staged packets",
                )
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            )?,
        )?;

        Ok(Self {
            registry,
            messages_dispatched_total,
            messages_rejected_total,
            messages_unhandled_total,
            handler_failures_total,
            drones_known,
            drones_up,
            ring_size,
            scheduler_depth,
            events_total,
            network_commit_seconds,
        })
    }

    /// Records the outcome of one readiness event.
    pub fn observe_readiness(&self, report: &ReadinessReport) {
        self.messages_dispatched_total.inc_by(report.dispatched as u64);
        self.messages_rejected_total.inc_by(report.rejected as u64);
        for elapsed in &report.commit_times {
            self.network_commit_seconds.observe(elapsed.as_secs_f64());
        }
    }

    /// Refreshes the gauges and the unhandled counter from current state.
    pub fn observe_state(&self, ctx: &CmaContext, stats: DispatchStats, queue_depth: usize) {
        self.drones_known.set(ctx.registry.drone_count() as i64);
        self.drones_up.set(ctx.registry.up_count() as i64);
        for ring in ctx.registry.rings() {
            self.ring_size
                .with_label_values(&[ring.name()])
                .set(ring.size(&ctx.store) as i64);
        }
        self.scheduler_depth.set(queue_depth as i64);

        let counted = self.messages_unhandled_total.get();
        if stats.unhandled > counted {
            self.messages_unhandled_total.inc_by(stats.unhandled - counted);
        }
    }

    pub fn observe_event(&self, event: &NodeEvent) {
        let kind = event.kind.to_string();
        self.events_total.with_label_values(&[kind.as_str()]).inc();
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub type SharedMetrics = Arc<CmaMetrics>;

/// `/metrics` and `/health`.
pub fn router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

async fn health_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "drones_known": metrics.drones_known.get(),
        "drones_up": metrics.drones_up.get(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
