//! SQLite schema of the judge store.

/// Problem metadata. `supported_languages` is a JSON array.
pub const CREATE_PROBLEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS problems (
    id                  TEXT    PRIMARY KEY,
    title               TEXT    NOT NULL,
    difficulty          TEXT    NOT NULL DEFAULT '',
    time_limit_ms       INTEGER,
    memory_limit_mb     INTEGER,
    supported_languages TEXT    NOT NULL DEFAULT '[]',
    updated_at          TEXT    NOT NULL DEFAULT (datetime('now'))
)
"#;

/// Test cases, ordered within a problem by `position`.
pub const CREATE_TEST_CASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS test_cases (
    problem_id      TEXT    NOT NULL REFERENCES problems(id) ON DELETE CASCADE,
    position        INTEGER NOT NULL,
    id              TEXT    NOT NULL,
    input           TEXT    NOT NULL,
    expected_output TEXT    NOT NULL,
    hidden          INTEGER NOT NULL DEFAULT 0,
    weight          INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (problem_id, position)
)
"#;

/// Submissions. `test_case_results` is a JSON array in judging order.
pub const CREATE_SUBMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS submissions (
    id                        TEXT    PRIMARY KEY,
    user_id                   TEXT    NOT NULL,
    problem_id                TEXT    NOT NULL,
    language                  TEXT    NOT NULL,
    source_code               TEXT    NOT NULL,
    status                    TEXT    NOT NULL,
    submitted_at              TEXT    NOT NULL,
    completed_at              TEXT,
    average_execution_time_ms INTEGER NOT NULL DEFAULT 0,
    peak_memory_kb            INTEGER NOT NULL DEFAULT 0,
    test_case_results         TEXT    NOT NULL DEFAULT '[]'
)
"#;

/// Best-result records; `version` guards concurrent read-modify-write.
pub const CREATE_SUMMARIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS submission_summaries (
    user_id                TEXT    NOT NULL,
    problem_id             TEXT    NOT NULL,
    language               TEXT    NOT NULL,
    attempt_count          INTEGER NOT NULL,
    solved                 INTEGER NOT NULL,
    first_solved_at        TEXT,
    best_execution_time_ms INTEGER,
    best_memory_kb         INTEGER,
    best_submission_id     TEXT,
    last_submission_id     TEXT,
    last_attempted_at      TEXT,
    version                INTEGER NOT NULL,
    PRIMARY KEY (user_id, problem_id)
)
"#;

/// Submissions already folded into a summary.
pub const CREATE_SUMMARY_ATTEMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS summary_attempts (
    submission_id TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    problem_id    TEXT NOT NULL,
    recorded_at   TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_submissions_user_problem
    ON submissions(user_id, problem_id, submitted_at)
"#;

/// Returns all schema statements in order of execution.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_PROBLEMS_TABLE,
        CREATE_TEST_CASES_TABLE,
        CREATE_SUBMISSIONS_TABLE,
        CREATE_SUMMARIES_TABLE,
        CREATE_SUMMARY_ATTEMPTS_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names used throughout the store.
pub mod tables {
    pub const PROBLEMS: &str = "problems";
    pub const TEST_CASES: &str = "test_cases";
    pub const SUBMISSIONS: &str = "submissions";
    pub const SUBMISSION_SUMMARIES: &str = "submission_summaries";
    pub const SUMMARY_ATTEMPTS: &str = "summary_attempts";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn test_tables_referenced_in_schema() {
        let all = all_schema_statements().join("\n");
        for table in [
            tables::PROBLEMS,
            tables::TEST_CASES,
            tables::SUBMISSIONS,
            tables::SUBMISSION_SUMMARIES,
            tables::SUMMARY_ATTEMPTS,
        ] {
            assert!(all.contains(table), "missing {table}");
        }
    }
}
