//! Prometheus metrics registration and export.
//!
//! All judge metrics live in one registry created by [`init_metrics`].
//! Recording before initialisation is a no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all judge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Completed submissions, labeled by final status and language.
pub static SUBMISSIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// End-to-end submission judging duration in seconds, labeled by language.
pub static SUBMISSION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Test case results, labeled by verdict.
pub static TEST_CASE_VERDICTS: OnceLock<CounterVec> = OnceLock::new();

/// Sandbox runs, labeled by language and outcome (`completed` or `timeout`).
pub static SANDBOX_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sandbox run duration in seconds including image build and teardown, labeled by language.
pub static SANDBOX_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of sandboxes currently alive.
pub static SANDBOXES_IN_FLIGHT: OnceLock<Gauge> = OnceLock::new();

/// Summary writes lost to a concurrent writer and retried.
pub static SUMMARY_CONFLICTS: OnceLock<Counter> = OnceLock::new();

/// Summary aggregations that failed outright.
pub static SUMMARY_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Submission metrics
    let submissions_total = CounterVec::new(
        Opts::new("elitecode_submissions_total", "Total number of judged submissions"),
        &["status", "language"],
    )?;

    let submission_duration = HistogramVec::new(
        HistogramOpts::new(
            "elitecode_submission_duration_seconds",
            "Submission judging duration in seconds",
        )
        .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["language"],
    )?;

    let test_case_verdicts = CounterVec::new(
        Opts::new("elitecode_test_case_verdicts_total", "Test case results by verdict"),
        &["verdict"],
    )?;

    // Sandbox metrics
    let sandbox_runs_total = CounterVec::new(
        Opts::new("elitecode_sandbox_runs_total", "Total sandbox runs"),
        &["language", "outcome"],
    )?;

    let sandbox_duration = HistogramVec::new(
        HistogramOpts::new(
            "elitecode_sandbox_duration_seconds",
            "Sandbox run duration in seconds",
        )
        .buckets(vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["language"],
    )?;

    let sandboxes_in_flight = Gauge::new(
        "elitecode_sandboxes_in_flight",
        "Number of sandboxes currently alive",
    )?;

    // Summary metrics
    let summary_conflicts = Counter::new(
        "elitecode_summary_conflicts_total",
        "Summary writes retried after a concurrent update",
    )?;

    let summary_failures = Counter::new(
        "elitecode_summary_failures_total",
        "Summary aggregations that failed",
    )?;

    registry.register(Box::new(submissions_total.clone()))?;
    registry.register(Box::new(submission_duration.clone()))?;
    registry.register(Box::new(test_case_verdicts.clone()))?;
    registry.register(Box::new(sandbox_runs_total.clone()))?;
    registry.register(Box::new(sandbox_duration.clone()))?;
    registry.register(Box::new(sandboxes_in_flight.clone()))?;
    registry.register(Box::new(summary_conflicts.clone()))?;
    registry.register(Box::new(summary_failures.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = SUBMISSIONS_TOTAL.set(submissions_total);
    let _ = SUBMISSION_DURATION.set(submission_duration);
    let _ = TEST_CASE_VERDICTS.set(test_case_verdicts);
    let _ = SANDBOX_RUNS_TOTAL.set(sandbox_runs_total);
    let _ = SANDBOX_DURATION.set(sandbox_duration);
    let _ = SANDBOXES_IN_FLIGHT.set(sandboxes_in_flight);
    let _ = SUMMARY_CONFLICTS.set(summary_conflicts);
    let _ = SUMMARY_FAILURES.set(summary_failures);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
