//! Summary aggregator: folds completed submissions into the per-(user,
//! problem) best-result record.
//!
//! Writes are optimistic: read the record with its version, compute the
//! new record with [`apply_attempt`], and write it back only if the version
//! is unchanged. A lost race re-reads and tries again. Each submission id is
//! recorded with the write, so folding the same submission twice is a no-op.

use std::sync::Arc;

use tracing::debug;

use crate::error::JudgeError;
use crate::metrics::MetricsCollector;
use crate::models::{Submission, SubmissionSummary};
use crate::storage::{SummaryStore, SummaryWrite, VersionedSummary};

/// Default number of optimistic write attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Computes the summary after one more attempt.
///
/// Best time and best memory are minimised independently; the best
/// submission id follows the best time. The language is the best
/// submission's once solved, the latest attempt's before that.
pub fn apply_attempt(
    existing: Option<SubmissionSummary>,
    user_id: &str,
    problem_id: &str,
    submission: &Submission,
) -> SubmissionSummary {
    let mut summary = existing.unwrap_or_else(|| SubmissionSummary::empty(user_id, problem_id));
    let attempted_at = submission.completed_at.unwrap_or(submission.submitted_at);

    summary.attempt_count = summary.attempt_count.saturating_add(1);
    summary.last_attempted_at = Some(attempted_at);
    summary.last_submission_id = Some(submission.id.clone());

    if !summary.solved {
        summary.language = submission.language.clone();
    }

    if submission.status.is_accepted() {
        summary.solved = true;
        if summary.first_solved_at.is_none() {
            summary.first_solved_at = Some(attempted_at);
        }

        let time = submission.average_execution_time_ms;
        if summary.best_execution_time_ms.map_or(true, |best| time < best) {
            summary.best_execution_time_ms = Some(time);
            summary.best_submission_id = Some(submission.id.clone());
            summary.language = submission.language.clone();
        }

        // 0 means the run finished before memory was sampled
        let memory = submission.peak_memory_kb;
        if memory > 0 && summary.best_memory_kb.map_or(true, |best| memory < best) {
            summary.best_memory_kb = Some(memory);
        }
    }

    summary
}

/// Applies [`apply_attempt`] against a [`SummaryStore`] with optimistic retries.
pub struct SummaryAggregator {
    store: Arc<dyn SummaryStore>,
    max_attempts: u32,
    metrics: MetricsCollector,
}

impl SummaryAggregator {
    pub fn new(store: Arc<dyn SummaryStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets how many times a contended write is attempted (at least once).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Folds a completed `submission` into the summary of (`user_id`, `problem_id`).
    ///
    /// Returns the summary as stored afterwards. Re-recording a submission
    /// that was already folded in changes nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the submission has not finished judging
    /// - `SummaryContention` if every attempt lost to a concurrent writer
    /// - `Storage` on store failure
    pub async fn record_attempt(
        &self,
        user_id: &str,
        problem_id: &str,
        submission: &Submission,
    ) -> Result<SubmissionSummary, JudgeError> {
        if !submission.status.is_terminal() {
            return Err(JudgeError::InvalidTransition {
                from: submission.status.to_string(),
                event: "record_attempt".to_string(),
            });
        }

        for attempt in 1..=self.max_attempts {
            let current = self.store.load_summary(user_id, problem_id).await?;
            let expected_version = current.as_ref().map(|c| c.version);
            let existing = current.map(|VersionedSummary { summary, .. }| summary);

            let updated = apply_attempt(existing.clone(), user_id, problem_id, submission);

            match self
                .store
                .store_summary(&updated, expected_version, &submission.id)
                .await?
            {
                SummaryWrite::Committed { version } => {
                    debug!(
                        user_id = user_id,
                        problem_id = problem_id,
                        submission_id = %submission.id,
                        version = version,
                        "Summary updated"
                    );
                    return Ok(updated);
                }
                SummaryWrite::AlreadyRecorded => {
                    debug!(submission_id = %submission.id, "Submission already in summary");
                    return Ok(existing.unwrap_or(updated));
                }
                SummaryWrite::Conflict => {
                    self.metrics.record_summary_conflict();
                    debug!(
                        user_id = user_id,
                        problem_id = problem_id,
                        attempt = attempt,
                        "Summary write conflicted, retrying"
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        Err(JudgeError::SummaryContention {
            user_id: user_id.to_string(),
            problem_id: problem_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}
