//! SQLite-backed implementation of the judge stores.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::migrations::MigrationRunner;
use super::schema::tables;
use super::{ProblemStore, SubmissionStore, SummaryStore, SummaryWrite, VersionedSummary};
use crate::error::StoreError;
use crate::judge::verdict::SubmissionStatus;
use crate::models::{Problem, Submission, SubmissionSummary, TestCase, TestCaseResult};

/// How long a connection waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable store for problems, submissions and summaries.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `url` and applies migrations.
    ///
    /// Accepts `sqlite://path/to/file.db` or a bare file path.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{}", url)
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        MigrationRunner::new(pool.clone()).run_migrations().await?;

        tracing::info!(url = %url, "Judge store opened");
        Ok(Self { pool })
    }

    /// Wraps an existing pool. Migrations are not run.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// =============================================================================
// Problems
// =============================================================================

#[async_trait]
impl ProblemStore for SqliteStore {
    async fn get_problem(&self, id: &str) -> Result<Option<Problem>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, difficulty, time_limit_ms, memory_limit_mb, supported_languages
             FROM problems WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let languages_json: String = row.get("supported_languages");
        let supported_languages: Vec<String> = serde_json::from_str(&languages_json)?;

        let case_rows = sqlx::query(
            "SELECT id, input, expected_output, hidden, weight
             FROM test_cases WHERE problem_id = ?1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let test_cases = case_rows
            .into_iter()
            .map(|r| TestCase {
                id: r.get("id"),
                input: r.get("input"),
                expected_output: r.get("expected_output"),
                hidden: r.get::<i64, _>("hidden") != 0,
                weight: u32::try_from(r.get::<i64, _>("weight")).unwrap_or(0),
            })
            .collect();

        Ok(Some(Problem {
            id: row.get("id"),
            title: row.get("title"),
            difficulty: row.get("difficulty"),
            time_limit_ms: row.get::<Option<i64>, _>("time_limit_ms").map(to_u64),
            memory_limit_mb: row.get::<Option<i64>, _>("memory_limit_mb").map(to_u64),
            supported_languages,
            test_cases,
        }))
    }

    async fn put_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let languages_json = serde_json::to_string(&problem.supported_languages)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO problems (
                id, title, difficulty, time_limit_ms, memory_limit_mb, supported_languages, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                difficulty = excluded.difficulty,
                time_limit_ms = excluded.time_limit_ms,
                memory_limit_mb = excluded.memory_limit_mb,
                supported_languages = excluded.supported_languages,
                updated_at = datetime('now')",
        )
        .bind(&problem.id)
        .bind(&problem.title)
        .bind(&problem.difficulty)
        .bind(problem.time_limit_ms.map(to_i64))
        .bind(problem.memory_limit_mb.map(to_i64))
        .bind(&languages_json)
        .execute(&mut *tx)
        .await?;

        // Replace the full test case set
        sqlx::query("DELETE FROM test_cases WHERE problem_id = ?1")
            .bind(&problem.id)
            .execute(&mut *tx)
            .await?;

        for (position, tc) in problem.test_cases.iter().enumerate() {
            sqlx::query(
                "INSERT INTO test_cases (
                    problem_id, position, id, input, expected_output, hidden, weight
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&problem.id)
            .bind(position as i64)
            .bind(&tc.id)
            .bind(&tc.input)
            .bind(&tc.expected_output)
            .bind(tc.hidden as i64)
            .bind(i64::from(tc.weight))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Submissions
// =============================================================================

fn submission_from_row(row: &SqliteRow) -> Result<Submission, StoreError> {
    let status_str: String = row.get("status");
    let status = SubmissionStatus::from_str(&status_str).map_err(|e| StoreError::Corrupt {
        table: tables::SUBMISSIONS.to_string(),
        reason: e.to_string(),
    })?;

    let results_json: String = row.get("test_case_results");
    let test_case_results: Vec<TestCaseResult> = serde_json::from_str(&results_json)?;

    Ok(Submission {
        id: row.get("id"),
        user_id: row.get("user_id"),
        problem_id: row.get("problem_id"),
        language: row.get("language"),
        source_code: row.get("source_code"),
        status,
        submitted_at: row.get::<DateTime<Utc>, _>("submitted_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
        average_execution_time_ms: to_u64(row.get("average_execution_time_ms")),
        peak_memory_kb: to_u64(row.get("peak_memory_kb")),
        test_case_results,
    })
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let results_json = serde_json::to_string(&submission.test_case_results)?;

        sqlx::query(
            "INSERT INTO submissions (
                id, user_id, problem_id, language, source_code, status, submitted_at,
                completed_at, average_execution_time_ms, peak_memory_kb, test_case_results
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                average_execution_time_ms = excluded.average_execution_time_ms,
                peak_memory_kb = excluded.peak_memory_kb,
                test_case_results = excluded.test_case_results",
        )
        .bind(&submission.id)
        .bind(&submission.user_id)
        .bind(&submission.problem_id)
        .bind(&submission.language)
        .bind(&submission.source_code)
        .bind(submission.status.as_str())
        .bind(submission.submitted_at)
        .bind(submission.completed_at)
        .bind(to_i64(submission.average_execution_time_ms))
        .bind(to_i64(submission.peak_memory_kb))
        .bind(&results_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        let row = sqlx::query("SELECT * FROM submissions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    async fn list_submissions(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Vec<Submission>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM submissions
             WHERE user_id = ?1 AND problem_id = ?2
             ORDER BY submitted_at DESC, id DESC",
        )
        .bind(user_id)
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(submission_from_row).collect()
    }
}

// =============================================================================
// Summaries
// =============================================================================

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn load_summary(
        &self,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Option<VersionedSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM submission_summaries WHERE user_id = ?1 AND problem_id = ?2",
        )
        .bind(user_id)
        .bind(problem_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary = SubmissionSummary {
            user_id: row.get("user_id"),
            problem_id: row.get("problem_id"),
            language: row.get("language"),
            attempt_count: u32::try_from(row.get::<i64, _>("attempt_count")).unwrap_or(u32::MAX),
            solved: row.get::<i64, _>("solved") != 0,
            first_solved_at: row.get("first_solved_at"),
            best_execution_time_ms: row.get::<Option<i64>, _>("best_execution_time_ms").map(to_u64),
            best_memory_kb: row.get::<Option<i64>, _>("best_memory_kb").map(to_u64),
            best_submission_id: row.get("best_submission_id"),
            last_submission_id: row.get("last_submission_id"),
            last_attempted_at: row.get("last_attempted_at"),
        };

        Ok(Some(VersionedSummary {
            summary,
            version: to_u64(row.get("version")),
        }))
    }

    async fn store_summary(
        &self,
        summary: &SubmissionSummary,
        expected_version: Option<u64>,
        submission_id: &str,
    ) -> Result<SummaryWrite, StoreError> {
        match self
            .write_summary(summary, expected_version, submission_id)
            .await
        {
            Err(StoreError::QueryFailed(e)) if is_busy(&e) => {
                tracing::debug!(
                    user_id = %summary.user_id,
                    problem_id = %summary.problem_id,
                    "Summary write found the database locked"
                );
                Ok(SummaryWrite::Conflict)
            }
            other => other,
        }
    }
}

impl SqliteStore {
    /// Compare-and-swap of one summary row.
    ///
    /// The first statement is a write, so the transaction takes the write
    /// lock up front (waiting up to the busy timeout) and no read snapshot
    /// can go stale before the upgrade.
    async fn write_summary(
        &self,
        summary: &SubmissionSummary,
        expected_version: Option<u64>,
        submission_id: &str,
    ) -> Result<SummaryWrite, StoreError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO summary_attempts (submission_id, user_id, problem_id) VALUES (?1, ?2, ?3)
            ON CONFLICT(submission_id) DO NOTHING",
        )
        .bind(submission_id)
        .bind(&summary.user_id)
        .bind(&summary.problem_id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SummaryWrite::AlreadyRecorded);
        }

        let (applied, new_version) = match expected_version {
            None => {
                let result = sqlx::query(
                    "INSERT INTO submission_summaries (
                        user_id, problem_id, language, attempt_count, solved, first_solved_at,
                        best_execution_time_ms, best_memory_kb, best_submission_id,
                        last_submission_id, last_attempted_at, version
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1)
                    ON CONFLICT(user_id, problem_id) DO NOTHING",
                )
                .bind(&summary.user_id)
                .bind(&summary.problem_id)
                .bind(&summary.language)
                .bind(i64::from(summary.attempt_count))
                .bind(summary.solved as i64)
                .bind(summary.first_solved_at)
                .bind(summary.best_execution_time_ms.map(to_i64))
                .bind(summary.best_memory_kb.map(to_i64))
                .bind(&summary.best_submission_id)
                .bind(&summary.last_submission_id)
                .bind(summary.last_attempted_at)
                .execute(&mut *tx)
                .await?;
                (result.rows_affected() == 1, 1)
            }
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE submission_summaries SET
                        language = ?3,
                        attempt_count = ?4,
                        solved = ?5,
                        first_solved_at = ?6,
                        best_execution_time_ms = ?7,
                        best_memory_kb = ?8,
                        best_submission_id = ?9,
                        last_submission_id = ?10,
                        last_attempted_at = ?11,
                        version = version + 1
                    WHERE user_id = ?1 AND problem_id = ?2 AND version = ?12",
                )
                .bind(&summary.user_id)
                .bind(&summary.problem_id)
                .bind(&summary.language)
                .bind(i64::from(summary.attempt_count))
                .bind(summary.solved as i64)
                .bind(summary.first_solved_at)
                .bind(summary.best_execution_time_ms.map(to_i64))
                .bind(summary.best_memory_kb.map(to_i64))
                .bind(&summary.best_submission_id)
                .bind(&summary.last_submission_id)
                .bind(summary.last_attempted_at)
                .bind(to_i64(version))
                .execute(&mut *tx)
                .await?;
                (result.rows_affected() == 1, version + 1)
            }
        };

        if !applied {
            tx.rollback().await?;
            return Ok(SummaryWrite::Conflict);
        }

        tx.commit().await?;

        Ok(SummaryWrite::Committed {
            version: new_version,
        })
    }
}

/// SQLITE_BUSY and its extended codes (BUSY_RECOVERY, BUSY_SNAPSHOT, ...).
fn is_busy(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| code & 0xff == SQLITE_BUSY),
        _ => false,
    }
}

const SQLITE_BUSY: i32 = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::verdict::Verdict;
    use tempfile::TempDir;

    async fn open_store() -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judge.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn problem() -> Problem {
        Problem::new("sum", "A + B")
            .with_limits(1000, 64)
            .with_languages(&["cpp", "python"])
            .with_test_case(TestCase::sample("1", "1 2\n", "3\n"))
            .with_test_case(TestCase::hidden("2", "5 5\n", "10\n"))
    }

    #[tokio::test]
    async fn test_problem_round_trip() {
        let (store, _dir) = open_store().await;
        store.put_problem(&problem()).await.unwrap();

        let loaded = store.get_problem("sum").await.unwrap().unwrap();
        assert_eq!(loaded, problem());
        assert!(store.get_problem("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_problem_replaces_test_cases() {
        let (store, _dir) = open_store().await;
        store.put_problem(&problem()).await.unwrap();

        let mut updated = problem();
        updated.test_cases.truncate(1);
        updated.title = "A plus B".to_string();
        store.put_problem(&updated).await.unwrap();

        let loaded = store.get_problem("sum").await.unwrap().unwrap();
        assert_eq!(loaded.title, "A plus B");
        assert_eq!(loaded.test_cases.len(), 1);
    }

    #[tokio::test]
    async fn test_submission_upsert_and_history_order() {
        let (store, _dir) = open_store().await;

        let mut first = Submission::new("alice", "sum", "cpp", "int main(){}");
        store.save_submission(&first).await.unwrap();

        first.status = SubmissionStatus::WrongAnswer;
        first.completed_at = Some(Utc::now());
        first.test_case_results.push(TestCaseResult {
            test_case_id: "1".to_string(),
            verdict: Verdict::WrongAnswer,
            execution_time_ms: 4,
            memory_used_kb: 1024,
            expected_output: Some("3".to_string()),
            actual_output: Some("4".to_string()),
            error_message: None,
        });
        store.save_submission(&first).await.unwrap();

        let mut second = Submission::new("alice", "sum", "cpp", "int main(){return 0;}");
        second.submitted_at = first.submitted_at + chrono::Duration::seconds(5);
        store.save_submission(&second).await.unwrap();

        let loaded = store.get_submission(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::WrongAnswer);
        assert_eq!(loaded.test_case_results.len(), 1);

        let history = store.list_submissions("alice", "sum").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert!(store.list_submissions("bob", "sum").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_status_is_reported() {
        let (store, _dir) = open_store().await;
        let submission = Submission::new("alice", "sum", "cpp", "");
        store.save_submission(&submission).await.unwrap();

        sqlx::query("UPDATE submissions SET status = 'exploded' WHERE id = ?1")
            .bind(&submission.id)
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.get_submission(&submission.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_summary_compare_and_swap() {
        let (store, _dir) = open_store().await;
        let mut summary = SubmissionSummary::empty("alice", "sum");
        summary.attempt_count = 1;

        let write = store.store_summary(&summary, None, "s1").await.unwrap();
        assert_eq!(write, SummaryWrite::Committed { version: 1 });

        // Creating again loses against the existing record
        summary.attempt_count = 1;
        let write = store.store_summary(&summary, None, "s2").await.unwrap();
        assert_eq!(write, SummaryWrite::Conflict);

        // Stale version loses too
        summary.attempt_count = 2;
        let write = store.store_summary(&summary, Some(7), "s2").await.unwrap();
        assert_eq!(write, SummaryWrite::Conflict);

        let write = store.store_summary(&summary, Some(1), "s2").await.unwrap();
        assert_eq!(write, SummaryWrite::Committed { version: 2 });

        let loaded = store.load_summary("alice", "sum").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.summary.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_summary_rejects_recorded_submission() {
        let (store, _dir) = open_store().await;
        let summary = SubmissionSummary::empty("alice", "sum");

        store.store_summary(&summary, None, "s1").await.unwrap();
        let write = store.store_summary(&summary, Some(1), "s1").await.unwrap();
        assert_eq!(write, SummaryWrite::AlreadyRecorded);

        let loaded = store.load_summary("alice", "sum").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_summary_attempts_all_counted() {
        use crate::judge::summary::SummaryAggregator;
        use crate::judge::verdict::SubmissionStatus;
        use std::sync::Arc;

        let (store, _dir) = open_store().await;
        let aggregator = Arc::new(SummaryAggregator::new(Arc::new(store.clone())).with_max_attempts(50));

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                let mut submission = Submission::new("alice", "sum", "cpp", "");
                submission.status = SubmissionStatus::Accepted;
                submission.average_execution_time_ms = 100 + i;
                submission.peak_memory_kb = 4096 - i;
                submission.completed_at = Some(submission.submitted_at);
                aggregator.record_attempt("alice", "sum", &submission).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load_summary("alice", "sum").await.unwrap().unwrap();
        assert_eq!(loaded.summary.attempt_count, 16);
        assert_eq!(loaded.version, 16);
        assert_eq!(loaded.summary.best_execution_time_ms, Some(100));
        assert_eq!(loaded.summary.best_memory_kb, Some(4081));

        let (recorded,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM summary_attempts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(recorded, 16);
    }

    #[tokio::test]
    async fn test_migrations_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judge.db");
        let path = path.to_str().unwrap();

        SqliteStore::open(path).await.unwrap();
        let store = SqliteStore::open(path).await.unwrap();

        let applied = MigrationRunner::new(store.pool().clone())
            .list_applied_migrations()
            .await
            .unwrap();
        assert_eq!(applied.len(), super::super::schema::all_schema_statements().len());
    }
}
