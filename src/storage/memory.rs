//! In-process implementation of the judge stores.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ProblemStore, SubmissionStore, SummaryStore, SummaryWrite, VersionedSummary};
use crate::error::StoreError;
use crate::models::{Problem, Submission, SubmissionSummary};

#[derive(Default)]
struct Inner {
    problems: HashMap<String, Problem>,
    submissions: HashMap<String, Submission>,
    summaries: HashMap<(String, String), VersionedSummary>,
    recorded: HashSet<String>,
}

/// Thread-safe, non-durable store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn get_problem(&self, id: &str) -> Result<Option<Problem>, StoreError> {
        Ok(self.lock().problems.get(id).cloned())
    }

    async fn put_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        self.lock()
            .problems
            .insert(problem.id.clone(), problem.clone());
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        self.lock()
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        Ok(self.lock().submissions.get(id).cloned())
    }

    async fn list_submissions(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut submissions: Vec<Submission> = self
            .lock()
            .submissions
            .values()
            .filter(|s| s.user_id == user_id && s.problem_id == problem_id)
            .cloned()
            .collect();

        submissions.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(submissions)
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn load_summary(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Option<VersionedSummary>, StoreError> {
        let key = (user_id.to_string(), problem_id.to_string());
        Ok(self.lock().summaries.get(&key).cloned())
    }

    async fn store_summary(
        &self,
        summary: &SubmissionSummary,
        expected_version: Option<u64>,
        submission_id: &str,
    ) -> Result<SummaryWrite, StoreError> {
        let mut inner = self.lock();

        if inner.recorded.contains(submission_id) {
            return Ok(SummaryWrite::AlreadyRecorded);
        }

        let key = (summary.user_id.clone(), summary.problem_id.clone());
        let current = inner.summaries.get(&key).map(|s| s.version);
        if current != expected_version {
            return Ok(SummaryWrite::Conflict);
        }

        let version = current.map_or(1, |v| v + 1);
        inner.summaries.insert(
            key,
            VersionedSummary {
                summary: summary.clone(),
                version,
            },
        );
        inner.recorded.insert(submission_id.to_string());

        Ok(SummaryWrite::Committed { version })
    }
}
