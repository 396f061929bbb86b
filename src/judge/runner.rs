//! Test case runner: one sandboxed run, one verdict.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::execution::{ExecutionResult, ResourceLimits, SandboxManager};
use crate::judge::verdict::Verdict;
use crate::metrics::MetricsCollector;
use crate::models::{TestCase, TestCaseResult};

/// Longest stderr excerpt carried in an error message.
const MAX_ERROR_EXCERPT: usize = 2048;

/// Runs single test cases through the sandbox and classifies the outcome.
pub struct TestCaseRunner {
    sandbox: Arc<SandboxManager>,
    metrics: MetricsCollector,
}

impl TestCaseRunner {
    pub fn new(sandbox: Arc<SandboxManager>) -> Self {
        Self {
            sandbox,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn sandbox(&self) -> &SandboxManager {
        &self.sandbox
    }

    /// Runs `source_code` on `test_case` and judges the result.
    pub async fn evaluate(
        &self,
        test_case: &TestCase,
        language: &str,
        source_code: &str,
        limits: &ResourceLimits,
    ) -> TestCaseResult {
        let execution = self
            .sandbox
            .run(language, source_code, &test_case.input, limits)
            .await;

        if let Some(error) = &execution.internal_error {
            warn!(test_case = %test_case.id, error = %error, "Sandbox failure recorded as internal error");
        }

        let mut result = judge(test_case, &execution, limits);
        let max_output = self.sandbox.options().max_output_bytes;
        result.actual_output = result
            .actual_output
            .map(|output| truncate_report(output, max_output));

        debug!(
            test_case = %test_case.id,
            verdict = %result.verdict,
            time_ms = result.execution_time_ms,
            memory_kb = result.memory_used_kb,
            "Test case judged"
        );
        self.metrics.record_verdict(result.verdict.as_str());

        result
    }
}

/// Classifies one execution.
///
/// Precedence: InternalError, CompileError, TimeLimitExceeded,
/// MemoryLimitExceeded, RuntimeError, then output comparison.
pub fn classify(execution: &ExecutionResult, expected_output: &str, limits: &ResourceLimits) -> Verdict {
    if execution.internal_error.is_some() {
        return Verdict::InternalError;
    }
    if execution.build_failed {
        return Verdict::CompileError;
    }
    if execution.timed_out || execution.wall_time > limits.wall_clock_limit {
        return Verdict::TimeLimitExceeded;
    }
    if execution.oom_killed || exceeds_memory(execution.peak_memory_bytes, limits.memory_bytes) {
        return Verdict::MemoryLimitExceeded;
    }
    if execution.exit_code != Some(0) {
        return Verdict::RuntimeError;
    }
    if outputs_match(&execution.stdout, expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Builds the full test case result for one execution.
pub fn judge(test_case: &TestCase, execution: &ExecutionResult, limits: &ResourceLimits) -> TestCaseResult {
    let verdict = classify(execution, &test_case.expected_output, limits);

    let (expected_output, actual_output) = if test_case.hidden {
        (None, None)
    } else {
        (
            Some(test_case.expected_output.clone()),
            Some(execution.stdout_lossy()),
        )
    };

    TestCaseResult {
        test_case_id: test_case.id.clone(),
        verdict,
        execution_time_ms: u64::try_from(execution.wall_time.as_millis()).unwrap_or(u64::MAX),
        memory_used_kb: execution.peak_memory_bytes / 1024,
        expected_output,
        actual_output,
        error_message: error_message(verdict, execution, limits),
    }
}

/// Cuts reported output to at most `max` bytes on a character boundary.
fn truncate_report(mut output: String, max: usize) -> String {
    if output.len() > max {
        let mut end = max;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        output.truncate(end);
    }
    output
}

fn exceeds_memory(peak_bytes: u64, limit_bytes: i64) -> bool {
    u64::try_from(limit_bytes).map_or(true, |limit| peak_bytes > limit)
}

/// Compares outputs ignoring leading and trailing whitespace.
fn outputs_match(actual: &[u8], expected: &str) -> bool {
    trim_whitespace(actual) == trim_whitespace(expected.as_bytes())
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn error_message(verdict: Verdict, execution: &ExecutionResult, limits: &ResourceLimits) -> Option<String> {
    match verdict {
        Verdict::Accepted | Verdict::WrongAnswer => None,
        Verdict::InternalError => execution.internal_error.clone(),
        Verdict::CompileError => Some(with_excerpt("Compilation failed", &execution.stderr)),
        Verdict::TimeLimitExceeded => Some(format!(
            "Time limit of {} ms exceeded",
            limits.time_limit_ms()
        )),
        Verdict::MemoryLimitExceeded if execution.oom_killed => Some(format!(
            "Killed after reaching the memory limit of {} KB",
            limits.memory_kb()
        )),
        Verdict::MemoryLimitExceeded => Some(format!(
            "Used {} KB, memory limit is {} KB",
            execution.peak_memory_bytes / 1024,
            limits.memory_kb()
        )),
        Verdict::RuntimeError => {
            let head = match execution.exit_code {
                Some(code) => format!("Exited with code {code}"),
                None => "Terminated abnormally".to_string(),
            };
            Some(with_excerpt(&head, &execution.stderr))
        }
    }
}

fn with_excerpt(head: &str, stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(trim_whitespace(stderr));
    if text.is_empty() {
        return head.to_string();
    }

    let excerpt: String = text.chars().take(MAX_ERROR_EXCERPT).collect();
    format!("{head}:\n{excerpt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits() -> ResourceLimits {
        ResourceLimits::new(134_217_728, 1_000_000_000, Duration::from_secs(2))
    }

    fn finished(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.as_bytes().to_vec(),
            exit_code: Some(0),
            wall_time: Duration::from_millis(35),
            peak_memory_bytes: 4 * 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        assert_eq!(classify(&finished("4"), "4\n", &limits()), Verdict::Accepted);
        assert_eq!(classify(&finished("  4\n\n"), "4", &limits()), Verdict::Accepted);
    }

    #[test]
    fn test_inner_whitespace_is_significant() {
        assert_eq!(classify(&finished("1  2"), "1 2", &limits()), Verdict::WrongAnswer);
        assert_eq!(classify(&finished("5"), "4", &limits()), Verdict::WrongAnswer);
        assert_eq!(classify(&finished(""), "", &limits()), Verdict::Accepted);
    }

    #[test]
    fn test_timeout_beats_correct_output() {
        let mut execution = finished("4");
        execution.timed_out = true;
        execution.exit_code = None;
        assert_eq!(classify(&execution, "4", &limits()), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn test_measured_time_over_limit_is_tle() {
        let mut execution = finished("4");
        execution.wall_time = Duration::from_millis(2001);
        assert_eq!(classify(&execution, "4", &limits()), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn test_memory_checked_before_output_and_exit_code() {
        let mut execution = finished("4");
        execution.peak_memory_bytes = 134_217_729;
        execution.exit_code = Some(137);
        assert_eq!(classify(&execution, "4", &limits()), Verdict::MemoryLimitExceeded);

        let mut oom = finished("");
        oom.oom_killed = true;
        oom.exit_code = Some(137);
        assert_eq!(classify(&oom, "4", &limits()), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn test_timeout_beats_memory() {
        let mut execution = finished("");
        execution.timed_out = true;
        execution.oom_killed = true;
        assert_eq!(classify(&execution, "4", &limits()), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn test_compile_error_beats_everything_but_internal() {
        let mut execution = finished("");
        execution.build_failed = true;
        execution.timed_out = true;
        execution.exit_code = Some(97);
        assert_eq!(classify(&execution, "4", &limits()), Verdict::CompileError);

        execution.internal_error = Some("daemon gone".to_string());
        assert_eq!(classify(&execution, "4", &limits()), Verdict::InternalError);
    }

    #[test]
    fn test_nonzero_exit_is_runtime_error() {
        let mut execution = finished("4");
        execution.exit_code = Some(139);
        execution.stderr = b"Segmentation fault\n".to_vec();
        let tc = TestCase::sample("1", "", "4");

        let result = judge(&tc, &execution, &limits());
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Exited with code 139:\nSegmentation fault")
        );
    }

    #[test]
    fn test_hidden_case_omits_outputs() {
        let tc = TestCase::hidden("h1", "2 2", "4");
        let result = judge(&tc, &finished("5"), &limits());

        assert_eq!(result.verdict, Verdict::WrongAnswer);
        assert!(result.expected_output.is_none());
        assert!(result.actual_output.is_none());
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_visible_case_reports_units() {
        let tc = TestCase::sample("s1", "2 2", "4");
        let result = judge(&tc, &finished("4\n"), &limits());

        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.execution_time_ms, 35);
        assert_eq!(result.memory_used_kb, 4096);
        assert_eq!(result.expected_output.as_deref(), Some("4"));
        assert_eq!(result.actual_output.as_deref(), Some("4\n"));
    }

    #[test]
    fn test_compile_error_message_carries_diagnostics() {
        let execution = ExecutionResult {
            exit_code: Some(97),
            build_failed: true,
            stderr: b"main.c:3:1: error: expected ';' before '}' token\n".to_vec(),
            ..Default::default()
        };
        let result = judge(&TestCase::sample("1", "", ""), &execution, &limits());
        let message = result.error_message.unwrap();
        assert!(message.starts_with("Compilation failed:\n"));
        assert!(message.contains("expected ';'"));
    }

    #[test]
    fn test_large_output_compared_in_full() {
        let expected = "1\n".repeat(50_000);
        assert_eq!(classify(&finished(&expected), &expected, &limits()), Verdict::Accepted);

        let mut almost = expected.clone();
        almost.replace_range(99_990..99_991, "2");
        assert_eq!(classify(&finished(&almost), &expected, &limits()), Verdict::WrongAnswer);
    }

    #[test]
    fn test_truncate_report() {
        assert_eq!(truncate_report("abcdef".to_string(), 3), "abc");
        assert_eq!(truncate_report("abc".to_string(), 10), "abc");
        // Never splits a multi-byte character
        assert_eq!(truncate_report("aé".to_string(), 2), "a");
    }

    #[test]
    fn test_trim_whitespace() {
        assert_eq!(trim_whitespace(b"  a b \n"), b"a b");
        assert_eq!(trim_whitespace(b" \t\n"), b"");
        assert_eq!(trim_whitespace(b""), b"");
    }
}
