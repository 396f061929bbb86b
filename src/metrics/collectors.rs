//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    SANDBOXES_IN_FLIGHT, SANDBOX_DURATION, SANDBOX_RUNS_TOTAL, SUBMISSIONS_TOTAL,
    SUBMISSION_DURATION, SUMMARY_CONFLICTS, SUMMARY_FAILURES, TEST_CASE_VERDICTS,
};

/// Metrics collector for judge operations.
///
/// Zero-sized; cloning or creating one per component is free. Metrics must be
/// initialized with `init_metrics()` for anything to be recorded.
///
/// # Example
///
/// ```ignore
/// use elitecode_judge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_verdict("wrong_answer");
/// collector.record_submission("accepted", "cpp", 4.2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a finished submission.
    ///
    /// # Arguments
    ///
    /// * `status` - Final submission status (e.g. "accepted", "wrong_answer")
    /// * `language` - Canonical language name
    /// * `duration_secs` - Time from creation to completion
    pub fn record_submission(&self, status: &str, language: &str, duration_secs: f64) {
        if let Some(total) = SUBMISSIONS_TOTAL.get() {
            total.with_label_values(&[status, language]).inc();
        }

        if let Some(duration) = SUBMISSION_DURATION.get() {
            duration
                .with_label_values(&[language])
                .observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            language = language,
            duration_secs = duration_secs,
            "Recorded submission metric"
        );
    }

    /// Record one test case verdict.
    pub fn record_verdict(&self, verdict: &str) {
        if let Some(verdicts) = TEST_CASE_VERDICTS.get() {
            verdicts.with_label_values(&[verdict]).inc();
        }
    }

    /// Mark a sandbox as alive until the returned guard is dropped.
    pub fn sandbox_in_flight(&self) -> InFlightGuard {
        if let Some(gauge) = SANDBOXES_IN_FLIGHT.get() {
            gauge.inc();
        }
        InFlightGuard { _private: () }
    }

    /// Record a finished sandbox run.
    pub fn record_sandbox_run(&self, language: &str, duration_secs: f64, timed_out: bool) {
        let outcome = if timed_out { "timeout" } else { "completed" };

        if let Some(runs) = SANDBOX_RUNS_TOTAL.get() {
            runs.with_label_values(&[language, outcome]).inc();
        }

        if let Some(duration) = SANDBOX_DURATION.get() {
            duration
                .with_label_values(&[language])
                .observe(duration_secs);
        }

        tracing::trace!(
            language = language,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded sandbox metric"
        );
    }

    /// Record a summary write that lost the optimistic race.
    pub fn record_summary_conflict(&self) {
        if let Some(conflicts) = SUMMARY_CONFLICTS.get() {
            conflicts.inc();
        }
    }

    /// Record a summary aggregation that gave up.
    pub fn record_summary_failure(&self) {
        if let Some(failures) = SUMMARY_FAILURES.get() {
            failures.inc();
        }
    }
}

/// Decrements the in-flight sandbox gauge on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(gauge) = SANDBOXES_IN_FLIGHT.get() {
            gauge.dec();
        }
    }
}
