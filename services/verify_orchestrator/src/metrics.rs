//! Metrics and monitoring for the verification orchestrator

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{Arc, LazyLock};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Global metrics instance
pub static METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

pub struct Metrics {
    registry: Registry,

    submissions_seen_total: IntCounter,
    submissions_rejected_total: IntCounter,
    duplicate_submissions_total: IntCounter,
    jobs_started_total: IntCounter,
    jobs_failed_to_start_total: IntCounter,
    jobs_finished_total: IntCounter,
    poll_errors_total: IntCounter,

    active_jobs: IntGauge,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).unwrap()
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let submissions_seen_total = counter(
            "sol_verify_submissions_seen_total",
            "SubmitProgram instructions decoded from the chain",
        );
        let submissions_rejected_total = counter(
            "sol_verify_submissions_rejected_total",
            "Submissions rejected by pre-flight validation",
        );
        let duplicate_submissions_total = counter(
            "sol_verify_duplicate_submissions_total",
            "Submissions dropped because the submitter already has an active job",
        );
        let jobs_started_total = counter("sol_verify_jobs_started_total", "Job containers started");
        let jobs_failed_to_start_total = counter(
            "sol_verify_jobs_failed_to_start_total",
            "Jobs whose image or container could not be created",
        );
        let jobs_finished_total = counter(
            "sol_verify_jobs_finished_total",
            "Jobs reclaimed after a terminal status",
        );
        let poll_errors_total = counter(
            "sol_verify_poll_errors_total",
            "Poll cycles abandoned on an RPC error",
        );
        let active_jobs =
            IntGauge::with_opts(Opts::new("sol_verify_active_jobs", "Jobs currently active")).unwrap();

        registry.register(Box::new(submissions_seen_total.clone())).unwrap();
        registry.register(Box::new(submissions_rejected_total.clone())).unwrap();
        registry.register(Box::new(duplicate_submissions_total.clone())).unwrap();
        registry.register(Box::new(jobs_started_total.clone())).unwrap();
        registry.register(Box::new(jobs_failed_to_start_total.clone())).unwrap();
        registry.register(Box::new(jobs_finished_total.clone())).unwrap();
        registry.register(Box::new(poll_errors_total.clone())).unwrap();
        registry.register(Box::new(active_jobs.clone())).unwrap();

        Metrics {
            registry,
            submissions_seen_total,
            submissions_rejected_total,
            duplicate_submissions_total,
            jobs_started_total,
            jobs_failed_to_start_total,
            jobs_finished_total,
            poll_errors_total,
            active_jobs,
        }
    }

    pub fn record_submission_seen(&self) {
        self.submissions_seen_total.inc();
    }

    pub fn record_submission_rejected(&self) {
        self.submissions_rejected_total.inc();
    }

    pub fn record_duplicate_submission(&self) {
        self.duplicate_submissions_total.inc();
    }

    pub fn record_job_started(&self) {
        self.jobs_started_total.inc();
        self.active_jobs.inc();
    }

    pub fn record_job_start_failed(&self) {
        self.jobs_failed_to_start_total.inc();
    }

    pub fn record_job_finished(&self) {
        self.jobs_finished_total.inc();
        self.active_jobs.dec();
    }

    pub fn record_poll_error(&self) {
        self.poll_errors_total.inc();
    }

    /// Get metrics as Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `/metrics` and `/health`
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn start(&self) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port)).await?;
        info!("Metrics server listening on port {}", self.port);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match METRICS.export() {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to export metrics".to_string(),
            )
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
