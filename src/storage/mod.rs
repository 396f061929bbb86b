//! Persistence boundaries of the judge.
//!
//! The orchestrator only sees the three traits below, injected at
//! construction time. Two implementations ship with the crate:
//! - **SqliteStore**: durable storage on SQLite (WAL journal)
//! - **MemoryStore**: in-process storage for embedding and tests
//!
//! # Usage
//!
//! ```rust,ignore
//! use elitecode_judge::storage::{SqliteStore, SubmissionStore};
//!
//! let store = SqliteStore::open("sqlite://elitecode.db").await?;
//! let history = store.list_submissions("alice", "two-sum").await?;
//! ```

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Problem, Submission, SubmissionSummary};

pub use memory::MemoryStore;
pub use migrations::{AppliedMigration, MigrationRunner};
pub use sqlite::SqliteStore;

/// Source of problem metadata and test cases.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get_problem(&self, id: &str) -> Result<Option<Problem>, StoreError>;

    /// Inserts or replaces a problem together with its test cases.
    async fn put_problem(&self, problem: &Problem) -> Result<(), StoreError>;
}

/// Durable submission records.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Inserts or replaces a submission by id.
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>, StoreError>;

    /// Submissions of one user on one problem, newest first.
    async fn list_submissions(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Vec<Submission>, StoreError>;
}

/// A summary together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSummary {
    pub summary: SubmissionSummary,
    pub version: u64,
}

/// Result of a conditional summary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryWrite {
    /// The write was applied; the record is now at `version`.
    Committed { version: u64 },
    /// Another writer got there first; re-read and retry.
    Conflict,
    /// This submission was already folded into the summary; nothing written.
    AlreadyRecorded,
}

/// Per-(user, problem) summary records with compare-and-swap writes.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn load_summary(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Option<VersionedSummary>, StoreError>;

    /// Writes `summary` if the stored version still equals `expected_version`
    /// (`None` meaning no record exists yet) and `submission_id` has not been
    /// recorded before. The version check, the write and the recording of
    /// `submission_id` happen atomically.
    async fn store_summary(
        &self,
        summary: &SubmissionSummary,
        expected_version: Option<u64>,
        submission_id: &str,
    ) -> Result<SummaryWrite, StoreError>;
}
