use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: submissions accepted. Labels: kind, late.
pub const SUBMISSIONS_TOTAL: &str = "aula_submissions_total";

/// Counter: submissions rejected. Labels: reason.
pub const SUBMISSIONS_REJECTED_TOTAL: &str = "aula_submissions_rejected_total";

/// Counter: grades recorded (automatic and manual). Labels: source.
pub const GRADES_TOTAL: &str = "aula_grades_total";

/// Counter: questions closed by the first correct answer.
pub const QUESTIONS_AUTOCLOSED_TOTAL: &str = "aula_questions_autoclosed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: questions currently held in memory.
pub const QUESTIONS_LOADED: &str = "aula_questions_loaded";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "aula_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "aula_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
