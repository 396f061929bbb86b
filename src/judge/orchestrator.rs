//! Submission orchestrator.
//!
//! Drives a submission through its test cases:
//!
//! ```text
//! Pending ──begin──► Running{next} ──record──► Running{next+1} ──► ... ──► Finished{aborted: false}
//!                          │
//!                          └──record(CompileError)──► Finished{aborted: true}
//! ```
//!
//! The loop itself is [`JudgeLoop`], a plain state machine with guarded
//! transitions that never touches the sandbox, so the short-circuit
//! behaviour can be exercised in isolation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{JudgeError, LimitError};
use crate::execution::{LanguageSpec, ResourceLimits};
use crate::judge::runner::TestCaseRunner;
use crate::judge::summary::SummaryAggregator;
use crate::judge::verdict::{SubmissionStatus, Verdict};
use crate::metrics::MetricsCollector;
use crate::models::{Problem, Submission, SubmissionSummary, TestCase, TestCaseResult};
use crate::storage::{ProblemStore, SubmissionStore};

// =============================================================================
// Judge loop state machine
// =============================================================================

/// State of a test-case loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeState {
    /// Created, no test case started.
    Pending,
    /// Looping; `next` is the index of the next test case to run.
    Running { next: usize },
    /// Done. `aborted` is set when a compile error cut the loop short.
    Finished { aborted: bool },
}

impl JudgeState {
    fn name(&self) -> &'static str {
        match self {
            JudgeState::Pending => "pending",
            JudgeState::Running { .. } => "running",
            JudgeState::Finished { .. } => "finished",
        }
    }
}

/// Statistics derived from a finished loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub status: SubmissionStatus,
    pub average_execution_time_ms: u64,
    pub peak_memory_kb: u64,
}

/// Results of a finished loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeOutcome {
    pub results: Vec<TestCaseResult>,
    pub aborted: bool,
    pub aggregate: Aggregate,
}

/// Sequential test-case loop with early abort on compile errors.
#[derive(Debug)]
pub struct JudgeLoop {
    state: JudgeState,
    total: usize,
    results: Vec<TestCaseResult>,
}

impl JudgeLoop {
    /// A loop over `total` test cases.
    pub fn new(total: usize) -> Self {
        Self {
            state: JudgeState::Pending,
            total,
            results: Vec::with_capacity(total),
        }
    }

    pub fn state(&self) -> JudgeState {
        self.state
    }

    pub fn results(&self) -> &[TestCaseResult] {
        &self.results
    }

    /// `Pending` to `Running`.
    pub fn begin(&mut self) -> Result<(), JudgeError> {
        match self.state {
            JudgeState::Pending if self.total == 0 => {
                self.state = JudgeState::Finished { aborted: false };
                Ok(())
            }
            JudgeState::Pending => {
                self.state = JudgeState::Running { next: 0 };
                Ok(())
            }
            other => Err(self.invalid(other, "begin")),
        }
    }

    /// Index of the test case to run next, if any.
    pub fn next_case(&self) -> Option<usize> {
        match self.state {
            JudgeState::Running { next } if next < self.total => Some(next),
            _ => None,
        }
    }

    /// Records the result of the current test case and advances.
    pub fn record(&mut self, result: TestCaseResult) -> Result<(), JudgeError> {
        let next = match self.state {
            JudgeState::Running { next } if next < self.total => next,
            other => return Err(self.invalid(other, "record")),
        };

        let verdict = result.verdict;
        self.results.push(result);

        self.state = if verdict == Verdict::CompileError {
            JudgeState::Finished { aborted: true }
        } else if next + 1 == self.total {
            JudgeState::Finished { aborted: false }
        } else {
            JudgeState::Running { next: next + 1 }
        };

        Ok(())
    }

    /// Consumes a finished loop.
    pub fn finish(self) -> Result<JudgeOutcome, JudgeError> {
        match self.state {
            JudgeState::Finished { aborted } => Ok(JudgeOutcome {
                aggregate: aggregate(&self.results),
                results: self.results,
                aborted,
            }),
            other => Err(self.invalid(other, "finish")),
        }
    }

    fn invalid(&self, from: JudgeState, event: &str) -> JudgeError {
        JudgeError::InvalidTransition {
            from: from.name().to_string(),
            event: event.to_string(),
        }
    }
}

/// Aggregates test case results.
///
/// The status is the verdict of the first non-accepted result, `Accepted`
/// when there is none. The average time covers results that actually ran
/// (compile and internal errors excluded). Peak memory is the maximum over
/// all results.
pub fn aggregate(results: &[TestCaseResult]) -> Aggregate {
    let status = results
        .iter()
        .find(|r| !r.verdict.is_accepted())
        .map_or(SubmissionStatus::Accepted, |r| r.verdict.into());

    let executed: Vec<u64> = results
        .iter()
        .filter(|r| r.verdict.executed())
        .map(|r| r.execution_time_ms)
        .collect();
    let average_execution_time_ms = if executed.is_empty() {
        0
    } else {
        executed.iter().sum::<u64>() / executed.len() as u64
    };

    let peak_memory_kb = results.iter().map(|r| r.memory_used_kb).max().unwrap_or(0);

    Aggregate {
        status,
        average_execution_time_ms,
        peak_memory_kb,
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Judges submissions end to end.
pub struct SubmissionOrchestrator {
    problems: Arc<dyn ProblemStore>,
    submissions: Arc<dyn SubmissionStore>,
    runner: TestCaseRunner,
    summaries: SummaryAggregator,
    default_limits: ResourceLimits,
    metrics: MetricsCollector,
}

impl SubmissionOrchestrator {
    /// Creates an orchestrator. `default_limits` apply where a problem
    /// specifies no limit of its own; the CPU share always comes from it.
    pub fn new(
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
        runner: TestCaseRunner,
        summaries: SummaryAggregator,
        default_limits: ResourceLimits,
    ) -> Self {
        Self {
            problems,
            submissions,
            runner,
            summaries,
            default_limits,
            metrics: MetricsCollector::new(),
        }
    }

    /// Judges `source_code` against every test case of `problem_id`.
    ///
    /// The submission is persisted as `Pending` before anything runs, again
    /// when judging starts and once more with the final verdict. Summary
    /// aggregation failures are logged and do not affect the result.
    ///
    /// # Errors
    ///
    /// Only conditions that make grading impossible: unknown problem,
    /// unsupported language, no test cases, invalid limits, store failure.
    pub async fn submit(
        &self,
        user_id: &str,
        problem_id: &str,
        source_code: &str,
        language: &str,
    ) -> Result<Submission, JudgeError> {
        let started = Instant::now();
        let problem = self.load_problem(problem_id).await?;
        let spec = self.resolve_language(&problem, language)?;
        if problem.test_cases.is_empty() {
            return Err(JudgeError::NoTestCases(problem.id));
        }
        let limits = self.limits_for(&problem)?;

        let mut submission = Submission::new(user_id, problem_id, &spec.name, source_code);
        self.submissions.save_submission(&submission).await?;
        info!(
            submission_id = %submission.id,
            user_id = user_id,
            problem_id = problem_id,
            language = %spec.name,
            test_cases = problem.test_cases.len(),
            "Submission created"
        );

        submission.status = SubmissionStatus::Running;
        self.submissions.save_submission(&submission).await?;

        let cases = problem.judging_order();
        let outcome = self
            .judge_cases(&cases, &spec.name, source_code, &limits)
            .await?;

        submission.status = outcome.aggregate.status;
        submission.average_execution_time_ms = outcome.aggregate.average_execution_time_ms;
        submission.peak_memory_kb = outcome.aggregate.peak_memory_kb;
        submission.test_case_results = outcome.results;
        submission.completed_at = Some(Utc::now().max(submission.submitted_at));
        self.submissions.save_submission(&submission).await?;

        info!(
            submission_id = %submission.id,
            status = %submission.status,
            passed = submission.passed(),
            total = cases.len(),
            aborted = outcome.aborted,
            avg_time_ms = submission.average_execution_time_ms,
            peak_memory_kb = submission.peak_memory_kb,
            "Submission judged"
        );
        self.metrics.record_submission(
            submission.status.as_str(),
            &submission.language,
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = self.record_summary(&submission).await {
            warn!(submission_id = %submission.id, error = %e, "Summary aggregation failed");
            self.metrics.record_summary_failure();
        }

        Ok(submission)
    }

    /// Runs only the visible sample cases. Nothing is persisted.
    pub async fn run_samples(
        &self,
        problem_id: &str,
        source_code: &str,
        language: &str,
    ) -> Result<JudgeOutcome, JudgeError> {
        let problem = self.load_problem(problem_id).await?;
        let spec = self.resolve_language(&problem, language)?;
        let samples = problem.sample_cases();
        if samples.is_empty() {
            return Err(JudgeError::NoTestCases(problem.id));
        }
        let limits = self.limits_for(&problem)?;

        self.judge_cases(&samples, &spec.name, source_code, &limits)
            .await
    }

    /// Folds a completed submission into its summary. Safe to call again
    /// for a submission whose earlier aggregation failed.
    pub async fn record_summary(&self, submission: &Submission) -> Result<SubmissionSummary, JudgeError> {
        self.summaries
            .record_attempt(&submission.user_id, &submission.problem_id, submission)
            .await
    }

    /// Limits for `problem`: its own time and memory limits where set,
    /// configured defaults otherwise.
    pub fn limits_for(&self, problem: &Problem) -> Result<ResourceLimits, JudgeError> {
        let memory_bytes = match problem.memory_limit_mb.filter(|mb| *mb > 0) {
            Some(mb) => i64::try_from(mb)
                .ok()
                .and_then(|mb| mb.checked_mul(1024 * 1024))
                .ok_or_else(|| LimitError::invalid(&format!("{mb}MB"), "memory limit overflows"))?,
            None => self.default_limits.memory_bytes,
        };

        let wall_clock_limit = problem
            .time_limit_ms
            .filter(|ms| *ms > 0)
            .map_or(self.default_limits.wall_clock_limit, Duration::from_millis);

        Ok(ResourceLimits::new(
            memory_bytes,
            self.default_limits.cpu_nano_units,
            wall_clock_limit,
        ))
    }

    async fn load_problem(&self, problem_id: &str) -> Result<Problem, JudgeError> {
        self.problems
            .get_problem(problem_id)
            .await?
            .ok_or_else(|| JudgeError::ProblemNotFound(problem_id.to_string()))
    }

    /// Resolves `language` and checks the problem accepts it.
    fn resolve_language(&self, problem: &Problem, language: &str) -> Result<LanguageSpec, JudgeError> {
        let registry = self.runner.sandbox().languages();
        let spec = registry.resolve(language)?;

        let allowed = problem.supported_languages.is_empty()
            || problem
                .supported_languages
                .iter()
                .any(|l| registry.resolve(l).is_ok_and(|s| s.name == spec.name));

        if allowed {
            Ok(spec.clone())
        } else {
            Err(JudgeError::UnsupportedLanguage(format!(
                "{} (problem '{}' accepts: {})",
                spec.name,
                problem.id,
                problem.supported_languages.join(", ")
            )))
        }
    }

    async fn judge_cases(
        &self,
        cases: &[&TestCase],
        language: &str,
        source_code: &str,
        limits: &ResourceLimits,
    ) -> Result<JudgeOutcome, JudgeError> {
        let mut judge = JudgeLoop::new(cases.len());
        judge.begin()?;

        while let Some(index) = judge.next_case() {
            let result = self
                .runner
                .evaluate(cases[index], language, source_code, limits)
                .await;
            judge.record(result)?;
        }

        judge.finish()
    }
}
