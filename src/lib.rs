//! elitecode-judge: submission judging engine for a coding-practice platform.
//!
//! Solutions are compiled and run inside disposable Docker containers with
//! memory, CPU and wall-clock limits. Each test case gets a verdict, the
//! submission gets the first failing verdict, and a per-user summary keeps
//! the best accepted result for every problem.

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod judge;
pub mod metrics;
pub mod models;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, JudgeConfig};
pub use error::{DockerError, JudgeError, LimitError, StoreError};
pub use execution::{ExecutionResult, LanguageRegistry, ResourceLimits, SandboxManager};
pub use judge::{SubmissionOrchestrator, SubmissionStatus, SummaryAggregator, TestCaseRunner, Verdict};
pub use models::{Problem, Submission, SubmissionSummary, TestCase, TestCaseResult};
