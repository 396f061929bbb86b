//! Domain records shared by the judge, storage and CLI layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::judge::verdict::{SubmissionStatus, Verdict};

/// One input/expected-output pair of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input: String,
    pub expected_output: String,
    /// Hidden cases never reveal their input or expected output.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl TestCase {
    /// Creates a visible sample case.
    pub fn sample(id: impl Into<String>, input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            expected_output: expected.into(),
            hidden: false,
            weight: 1,
        }
    }

    /// Creates a hidden case.
    pub fn hidden(id: impl Into<String>, input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::sample(id, input, expected)
        }
    }
}

/// Problem metadata as consumed by the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub difficulty: String,
    /// Per-run wall-clock limit; the configured default applies when absent.
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    /// Memory ceiling; the configured default applies when absent.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// Languages accepted for this problem. Empty means every registered language.
    #[serde(default)]
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            difficulty: String::new(),
            time_limit_ms: None,
            memory_limit_mb: None,
            supported_languages: Vec::new(),
            test_cases: Vec::new(),
        }
    }

    pub fn with_limits(mut self, time_limit_ms: u64, memory_limit_mb: u64) -> Self {
        self.time_limit_ms = Some(time_limit_ms);
        self.memory_limit_mb = Some(memory_limit_mb);
        self
    }

    pub fn with_test_case(mut self, test_case: TestCase) -> Self {
        self.test_cases.push(test_case);
        self
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.supported_languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Test cases in judging order: samples first, then hidden, each group in
    /// problem order.
    pub fn judging_order(&self) -> Vec<&TestCase> {
        let mut cases: Vec<&TestCase> = self.test_cases.iter().collect();
        cases.sort_by_key(|tc| tc.hidden);
        cases
    }

    /// Visible sample cases only.
    pub fn sample_cases(&self) -> Vec<&TestCase> {
        self.test_cases.iter().filter(|tc| !tc.hidden).collect()
    }
}

/// Outcome of one test case within a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: String,
    pub verdict: Verdict,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A candidate solution and its judging outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub average_execution_time_ms: u64,
    pub peak_memory_kb: u64,
    pub test_case_results: Vec<TestCaseResult>,
}

impl Submission {
    /// Creates a fresh `Pending` submission with a new id.
    pub fn new(
        user_id: impl Into<String>,
        problem_id: impl Into<String>,
        language: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            problem_id: problem_id.into(),
            language: language.into(),
            source_code: source_code.into(),
            status: SubmissionStatus::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            average_execution_time_ms: 0,
            peak_memory_kb: 0,
            test_case_results: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal() && self.completed_at.is_some()
    }

    /// Number of accepted test cases.
    pub fn passed(&self) -> usize {
        self.test_case_results
            .iter()
            .filter(|r| r.verdict.is_accepted())
            .count()
    }
}

/// Best-result record of one user on one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub attempt_count: u32,
    pub solved: bool,
    pub first_solved_at: Option<DateTime<Utc>>,
    pub best_execution_time_ms: Option<u64>,
    pub best_memory_kb: Option<u64>,
    pub best_submission_id: Option<String>,
    pub last_submission_id: Option<String>,
    pub last_attempted_at: Option<DateTime<Utc>>,
}

impl SubmissionSummary {
    /// A summary with no attempts yet.
    pub fn empty(user_id: impl Into<String>, problem_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            problem_id: problem_id.into(),
            language: String::new(),
            attempt_count: 0,
            solved: false,
            first_solved_at: None,
            best_execution_time_ms: None,
            best_memory_kb: None,
            best_submission_id: None,
            last_submission_id: None,
            last_attempted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judging_order_puts_samples_first() {
        let problem = Problem::new("two-sum", "Two Sum")
            .with_test_case(TestCase::hidden("h1", "", ""))
            .with_test_case(TestCase::sample("s1", "", ""))
            .with_test_case(TestCase::hidden("h2", "", ""))
            .with_test_case(TestCase::sample("s2", "", ""));

        let ids: Vec<&str> = problem
            .judging_order()
            .iter()
            .map(|tc| tc.id.as_str())
            .collect();
        assert_eq!(ids, vec!["s1", "s2", "h1", "h2"]);
        assert_eq!(problem.sample_cases().len(), 2);
    }

    #[test]
    fn test_problem_json_defaults() {
        let problem: Problem = serde_json::from_str(
            r#"{"id":"p1","test_cases":[{"id":"1","input":"1 2","expected_output":"3"}]}"#,
        )
        .unwrap();

        assert_eq!(problem.time_limit_ms, None);
        assert!(problem.supported_languages.is_empty());
        assert!(!problem.test_cases[0].hidden);
        assert_eq!(problem.test_cases[0].weight, 1);
    }

    #[test]
    fn test_new_submission_is_pending() {
        let submission = Submission::new("alice", "p1", "cpp", "int main(){}");
        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert!(submission.completed_at.is_none());
        assert!(!submission.is_complete());
        assert!(Uuid::parse_str(&submission.id).is_ok());
    }

    #[test]
    fn test_hidden_result_omits_outputs_in_json() {
        let result = TestCaseResult {
            test_case_id: "h1".to_string(),
            verdict: Verdict::WrongAnswer,
            execution_time_ms: 12,
            memory_used_kb: 2048,
            expected_output: None,
            actual_output: None,
            error_message: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("expected_output"));
        assert!(json.contains("\"wrong_answer\""));
    }
}
