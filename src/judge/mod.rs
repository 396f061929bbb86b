//! The judging engine.
//!
//! ```text
//! SubmissionOrchestrator ──► TestCaseRunner ──► SandboxManager
//!          │                       │
//!          │                       └──► classify ──► Verdict
//!          └──► SummaryAggregator ──► SummaryStore
//! ```

pub mod orchestrator;
pub mod runner;
pub mod summary;
pub mod verdict;

pub use orchestrator::{aggregate, Aggregate, JudgeLoop, JudgeOutcome, JudgeState, SubmissionOrchestrator};
pub use runner::{classify, judge, TestCaseRunner};
pub use summary::{apply_attempt, SummaryAggregator};
pub use verdict::{SubmissionStatus, UnknownStatus, Verdict};
