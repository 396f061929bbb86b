//! CLI command definitions for elitecode-judge.
//!
//! Submissions, sample runs and custom-input runs go through the Docker
//! sandbox; problem, submission and summary queries only touch the store.

use crate::config::JudgeConfig;
use crate::execution::{
    parse_cpu, parse_memory, DockerClient, ExecutionResult, LanguageRegistry, LanguageSpec,
    ResourceLimits, SandboxManager,
};
use crate::judge::{JudgeOutcome, SubmissionOrchestrator, SummaryAggregator, TestCaseRunner};
use crate::metrics::{export_metrics, init_metrics};
use crate::models::{Problem, Submission, SubmissionSummary, TestCaseResult};
use crate::storage::{ProblemStore, SqliteStore, SubmissionStore, SummaryStore};
use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Judge for the EliteCode practice platform.
#[derive(Parser)]
#[command(name = "elitecode-judge")]
#[command(about = "Judge coding-practice submissions in isolated Docker sandboxes")]
#[command(version)]
#[command(
    long_about = "elitecode-judge compiles and runs solutions inside locked-down containers, classifies every test case and keeps each user's best result per problem.\n\nExample usage:\n  elitecode-judge problem import two-sum.json\n  elitecode-judge submit solution.cpp --problem two-sum --user alice"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Database URL or path (overrides JUDGE_DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Print Prometheus metrics after the command finishes.
    #[arg(long, global = true)]
    pub print_metrics: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Judge a solution against every test case and record the result.
    Submit(SubmitArgs),

    /// Run a solution against the sample test cases only (nothing is recorded).
    Test(TestArgs),

    /// Run a program once on custom input.
    Run(RunArgs),

    /// Manage problems.
    Problem(ProblemArgs),

    /// Inspect a stored submission.
    Submission(SubmissionArgs),

    /// List a user's submissions for a problem, newest first.
    Submissions(HistoryArgs),

    /// Show a user's best result on a problem.
    Summary(HistoryArgs),

    /// List supported languages.
    Languages,
}

/// Arguments for `elitecode-judge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Source file of the solution.
    pub file: PathBuf,

    /// Problem identifier.
    #[arg(short, long)]
    pub problem: String,

    /// Language (detected from the file extension when omitted).
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    /// Submitting user.
    #[arg(short, long, env = "ELITECODE_USER")]
    pub user: Option<String>,

    /// Output the submission as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `elitecode-judge test`.
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// Source file of the solution.
    pub file: PathBuf,

    /// Problem identifier.
    #[arg(short, long)]
    pub problem: String,

    /// Language (detected from the file extension when omitted).
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `elitecode-judge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Source file of the program.
    pub file: PathBuf,

    /// Language (detected from the file extension when omitted).
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    /// File fed to the program on stdin.
    #[arg(short, long, conflicts_with = "input_text")]
    pub input: Option<PathBuf>,

    /// Literal text fed to the program on stdin.
    #[arg(long)]
    pub input_text: Option<String>,

    /// Memory limit (e.g. 256m); configured default when omitted.
    #[arg(long)]
    pub memory: Option<String>,

    /// CPU share in cores (e.g. 0.5); configured default when omitted.
    #[arg(long)]
    pub cpu: Option<String>,

    /// Wall-clock limit in milliseconds; configured default when omitted.
    #[arg(long)]
    pub time_limit_ms: Option<u64>,

    /// Output the execution result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Problem management entrypoint arguments.
#[derive(Parser, Debug)]
pub struct ProblemArgs {
    #[command(subcommand)]
    pub command: ProblemSubcommand,
}

/// Problem subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum ProblemSubcommand {
    /// Import (or replace) a problem from a JSON file.
    Import {
        /// JSON file holding one problem.
        file: PathBuf,
    },

    /// Show a problem and its sample cases.
    Show {
        /// Problem identifier.
        id: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Submission inspection arguments.
#[derive(Parser, Debug)]
pub struct SubmissionArgs {
    #[command(subcommand)]
    pub command: SubmissionSubcommand,
}

/// Submission subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum SubmissionSubcommand {
    /// Show one submission with its test case results.
    Show {
        /// Submission identifier.
        id: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for per-user, per-problem queries.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Problem identifier.
    #[arg(short, long)]
    pub problem: String,

    /// User to query.
    #[arg(short, long, env = "ELITECODE_USER")]
    pub user: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = JudgeConfig::from_env().context("Invalid judge configuration")?;
    if let Some(url) = cli.database_url {
        config = config.with_database_url(url);
    }

    if cli.print_metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    match cli.command {
        Commands::Submit(args) => run_submit_command(&config, args).await?,
        Commands::Test(args) => run_test_command(&config, args).await?,
        Commands::Run(args) => run_run_command(&config, args).await?,
        Commands::Problem(args) => run_problem_command(&config, args).await?,
        Commands::Submission(args) => run_submission_command(&config, args).await?,
        Commands::Submissions(args) => run_submissions_command(&config, args).await?,
        Commands::Summary(args) => run_summary_command(&config, args).await?,
        Commands::Languages => run_languages_command(),
    }

    if cli.print_metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

/// Everything a judging command needs.
struct Engine {
    sandbox: Arc<SandboxManager>,
    orchestrator: SubmissionOrchestrator,
    default_limits: ResourceLimits,
}

async fn open_store(config: &JudgeConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database_url)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_url))?;
    Ok(Arc::new(store))
}

async fn build_engine(config: &JudgeConfig) -> anyhow::Result<Engine> {
    let store = open_store(config).await?;
    let default_limits = config.default_limits()?;

    let docker = DockerClient::new().context("Docker is required to judge submissions")?;
    docker.ping().await.context("Docker daemon is not responding")?;

    let sandbox = Arc::new(SandboxManager::new(
        Arc::new(docker),
        Arc::new(LanguageRegistry::builtin()),
        config.sandbox_options(),
    ));

    let summaries =
        SummaryAggregator::new(store.clone()).with_max_attempts(config.summary_max_retries);

    let orchestrator = SubmissionOrchestrator::new(
        store.clone(),
        store,
        TestCaseRunner::new(Arc::clone(&sandbox)),
        summaries,
        default_limits,
    );

    Ok(Engine {
        sandbox,
        orchestrator,
        default_limits,
    })
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Uses the explicit language or detects it from the file extension.
fn resolve_language(
    registry: &LanguageRegistry,
    explicit: Option<&str>,
    file: &Path,
) -> anyhow::Result<LanguageSpec> {
    match explicit {
        Some(language) => Ok(registry.resolve(language)?.clone()),
        None => registry.detect(file).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "Cannot detect the language of {}; pass --language (one of: {})",
                file.display(),
                registry.names().join(", ")
            )
        }),
    }
}

fn resolve_user(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string())
}

// ============================================================================
// Judging commands
// ============================================================================

async fn run_submit_command(config: &JudgeConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let source = read_source(&args.file)?;
    let language = resolve_language(engine.sandbox.languages(), args.language.as_deref(), &args.file)?;
    let user = resolve_user(args.user);

    info!(problem = %args.problem, language = %language.name, user = %user, "Submitting");
    let submission = engine
        .orchestrator
        .submit(&user, &args.problem, &source, &language.name)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&submission)?);
    } else {
        print_submission(&submission);
    }

    Ok(())
}

async fn run_test_command(config: &JudgeConfig, args: TestArgs) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let source = read_source(&args.file)?;
    let language = resolve_language(engine.sandbox.languages(), args.language.as_deref(), &args.file)?;

    let outcome = engine
        .orchestrator
        .run_samples(&args.problem, &source, &language.name)
        .await?;

    if args.json {
        let output = serde_json::json!({
            "status": outcome.aggregate.status,
            "aborted": outcome.aborted,
            "average_execution_time_ms": outcome.aggregate.average_execution_time_ms,
            "peak_memory_kb": outcome.aggregate.peak_memory_kb,
            "results": outcome.results,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

async fn run_run_command(config: &JudgeConfig, args: RunArgs) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let source = read_source(&args.file)?;
    let language = resolve_language(engine.sandbox.languages(), args.language.as_deref(), &args.file)?;

    let input = match (&args.input, args.input_text) {
        (Some(path), _) => read_source(path)?,
        (None, Some(text)) => text,
        (None, None) => String::new(),
    };

    let defaults = engine.default_limits;
    let limits = ResourceLimits::new(
        match &args.memory {
            Some(memory) => parse_memory(memory)?,
            None => defaults.memory_bytes,
        },
        match &args.cpu {
            Some(cpu) => parse_cpu(cpu)?,
            None => defaults.cpu_nano_units,
        },
        args.time_limit_ms
            .map_or(defaults.wall_clock_limit, Duration::from_millis),
    );

    let result = engine
        .sandbox
        .run(&language.name, &source, &input, &limits)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run_json(&result))?);
    } else {
        print_execution(&result, &limits);
    }

    if let Some(error) = result.internal_error {
        anyhow::bail!("Sandbox failure: {}", error);
    }

    Ok(())
}

fn run_json(result: &ExecutionResult) -> serde_json::Value {
    serde_json::json!({
        "stdout": result.stdout_lossy(),
        "stderr": result.stderr_lossy(),
        "exit_code": result.exit_code,
        "wall_time_ms": result.wall_time.as_millis() as u64,
        "peak_memory_bytes": result.peak_memory_bytes,
        "timed_out": result.timed_out,
        "oom_killed": result.oom_killed,
        "build_failed": result.build_failed,
        "internal_error": result.internal_error,
    })
}

// ============================================================================
// Store commands
// ============================================================================

async fn run_problem_command(config: &JudgeConfig, args: ProblemArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match args.command {
        ProblemSubcommand::Import { file } => {
            let content = read_source(&file)?;
            let problem: Problem = serde_json::from_str(&content)
                .with_context(|| format!("Invalid problem JSON in {}", file.display()))?;

            if problem.test_cases.is_empty() {
                anyhow::bail!("Problem '{}' has no test cases", problem.id);
            }

            let registry = LanguageRegistry::builtin();
            for language in &problem.supported_languages {
                registry.resolve(language)?;
            }

            store.put_problem(&problem).await?;
            println!(
                "Imported problem '{}' ({} test cases, {} hidden)",
                problem.id,
                problem.test_cases.len(),
                problem.test_cases.iter().filter(|tc| tc.hidden).count()
            );
        }
        ProblemSubcommand::Show { id, json } => {
            let problem = store
                .get_problem(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Problem '{}' not found", id))?;

            if json {
                let mut visible = problem.clone();
                visible.test_cases.retain(|tc| !tc.hidden);
                println!("{}", serde_json::to_string_pretty(&visible)?);
            } else {
                print_problem(&problem);
            }
        }
    }

    Ok(())
}

async fn run_submission_command(config: &JudgeConfig, args: SubmissionArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match args.command {
        SubmissionSubcommand::Show { id, json } => {
            let submission = store
                .get_submission(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Submission '{}' not found", id))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&submission)?);
            } else {
                print_submission(&submission);
            }
        }
    }

    Ok(())
}

async fn run_submissions_command(config: &JudgeConfig, args: HistoryArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let user = resolve_user(args.user);
    let submissions = store.list_submissions(&user, &args.problem).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&submissions)?);
        return Ok(());
    }

    if submissions.is_empty() {
        println!("No submissions by {} for '{}'.", user, args.problem);
        return Ok(());
    }

    println!(
        "{:<36}  {:<22}  {:<10}  {:>8}  {:>10}  SUBMITTED",
        "ID", "STATUS", "LANGUAGE", "TIME", "MEMORY"
    );
    for s in &submissions {
        println!(
            "{:<36}  {:<22}  {:<10}  {:>6}ms  {:>8.2}MB  {}",
            s.id,
            s.status.as_str(),
            s.language,
            s.average_execution_time_ms,
            s.peak_memory_kb as f64 / 1024.0,
            s.submitted_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

async fn run_summary_command(config: &JudgeConfig, args: HistoryArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let user = resolve_user(args.user);

    let summary = store
        .load_summary(&user, &args.problem)
        .await?
        .map(|v| v.summary);

    match (summary, args.json) {
        (Some(summary), true) => println!("{}", serde_json::to_string_pretty(&summary)?),
        (Some(summary), false) => print_summary(&summary),
        (None, true) => println!("null"),
        (None, false) => println!("No attempts by {} on '{}'.", user, args.problem),
    }

    Ok(())
}

fn run_languages_command() {
    let registry = LanguageRegistry::builtin();
    for name in registry.names() {
        if let Ok(spec) = registry.resolve(name) {
            let kind = if spec.has_build_step() { "compiled" } else { "interpreted" };
            println!("{:<12} {:<24} {}", spec.name, spec.image, kind);
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_results(results: &[TestCaseResult]) {
    for (i, r) in results.iter().enumerate() {
        println!(
            "  #{:<3} {:<4} {:>6}ms {:>8.2}MB  ({})",
            i + 1,
            r.verdict.short(),
            r.execution_time_ms,
            r.memory_used_kb as f64 / 1024.0,
            r.test_case_id
        );
        if let (Some(expected), Some(actual)) = (&r.expected_output, &r.actual_output) {
            if !r.verdict.is_accepted() {
                println!("       expected: {}", expected.trim());
                println!("       actual:   {}", actual.trim());
            }
        }
        if let Some(message) = &r.error_message {
            for line in message.lines().take(10) {
                println!("       {}", line);
            }
        }
    }
}

fn print_submission(submission: &Submission) {
    println!("Submission {}", submission.id);
    println!(
        "  Problem: {}  Language: {}  User: {}",
        submission.problem_id, submission.language, submission.user_id
    );
    println!("  Status: {}", submission.status);
    println!(
        "  Passed: {}/{}",
        submission.passed(),
        submission.test_case_results.len()
    );
    println!("  Average Time: {}ms", submission.average_execution_time_ms);
    println!(
        "  Peak Memory: {:.2}MB",
        submission.peak_memory_kb as f64 / 1024.0
    );
    print_results(&submission.test_case_results);
}

fn print_outcome(outcome: &JudgeOutcome) {
    println!("Samples: {}", outcome.aggregate.status);
    if outcome.aborted {
        println!("  (stopped after a compile error)");
    }
    print_results(&outcome.results);
}

fn print_execution(result: &ExecutionResult, limits: &ResourceLimits) {
    if result.build_failed {
        println!("Build failed:");
        eprint!("{}", result.stderr_lossy());
        return;
    }

    print!("{}", result.stdout_lossy());
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr_lossy());
    }

    let status = if result.timed_out {
        format!("killed after {}ms", limits.time_limit_ms())
    } else if result.oom_killed {
        "killed: out of memory".to_string()
    } else {
        match result.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code".to_string(),
        }
    };
    eprintln!(
        "[{} | {}ms | {:.2}MB]",
        status,
        result.wall_time.as_millis(),
        result.peak_memory_bytes as f64 / (1024.0 * 1024.0)
    );
}

fn print_problem(problem: &Problem) {
    println!("{}: {}", problem.id, problem.title);
    if !problem.difficulty.is_empty() {
        println!("  Difficulty: {}", problem.difficulty);
    }
    if let Some(ms) = problem.time_limit_ms {
        println!("  Time limit: {}ms", ms);
    }
    if let Some(mb) = problem.memory_limit_mb {
        println!("  Memory limit: {}MB", mb);
    }
    if !problem.supported_languages.is_empty() {
        println!("  Languages: {}", problem.supported_languages.join(", "));
    }
    println!(
        "  Test cases: {} ({} hidden)",
        problem.test_cases.len(),
        problem.test_cases.iter().filter(|tc| tc.hidden).count()
    );
    for tc in problem.sample_cases() {
        println!("  --- sample {} ---", tc.id);
        println!("  input:\n{}", tc.input);
        println!("  expected:\n{}", tc.expected_output);
    }
}

fn print_summary(summary: &SubmissionSummary) {
    println!("{} on {}", summary.user_id, summary.problem_id);
    println!("  Attempts: {}", summary.attempt_count);
    println!("  Solved: {}", if summary.solved { "yes" } else { "no" });
    if !summary.language.is_empty() {
        println!("  Language: {}", summary.language);
    }
    if let Some(at) = summary.first_solved_at {
        println!("  First solved: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ms) = summary.best_execution_time_ms {
        println!("  Best time: {}ms", ms);
    }
    if let Some(kb) = summary.best_memory_kb {
        println!("  Best memory: {:.2}MB", kb as f64 / 1024.0);
    }
    if let Some(id) = &summary.best_submission_id {
        println!("  Best submission: {}", id);
    }
    if let Some(at) = summary.last_attempted_at {
        println!("  Last attempt: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_command() {
        let cli = Cli::try_parse_from([
            "elitecode-judge",
            "submit",
            "main.cpp",
            "--problem",
            "two-sum",
            "--user",
            "alice",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "info");
        assert!(!cli.print_metrics);
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.file, PathBuf::from("main.cpp"));
                assert_eq!(args.problem, "two-sum");
                assert_eq!(args.user.as_deref(), Some("alice"));
                assert!(args.language.is_none());
                assert!(!args.json);
            }
            _ => panic!("Expected Submit command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "elitecode-judge",
            "languages",
            "--print-metrics",
            "--log-level",
            "debug",
            "--database-url",
            "sqlite://other.db",
        ])
        .expect("should parse");

        assert!(cli.print_metrics);
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.database_url.as_deref(), Some("sqlite://other.db"));
        assert!(matches!(cli.command, Commands::Languages));
    }

    #[test]
    fn test_run_command_limits() {
        let cli = Cli::try_parse_from([
            "elitecode-judge",
            "run",
            "prog.py",
            "--input-text",
            "1 2",
            "--memory",
            "64m",
            "--time-limit-ms",
            "500",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input_text.as_deref(), Some("1 2"));
                assert_eq!(args.memory.as_deref(), Some("64m"));
                assert_eq!(args.time_limit_ms, Some(500));
                assert!(args.cpu.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_input_sources_conflict() {
        let result = Cli::try_parse_from([
            "elitecode-judge",
            "run",
            "prog.py",
            "--input",
            "in.txt",
            "--input-text",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_problem_subcommands() {
        let cli = Cli::try_parse_from(["elitecode-judge", "problem", "show", "two-sum", "--json"])
            .expect("should parse");
        match cli.command {
            Commands::Problem(ProblemArgs {
                command: ProblemSubcommand::Show { id, json },
            }) => {
                assert_eq!(id, "two-sum");
                assert!(json);
            }
            _ => panic!("Expected problem show"),
        }
    }

    #[test]
    fn test_resolve_language_detects_extension() {
        let registry = LanguageRegistry::builtin();
        let spec = resolve_language(&registry, None, Path::new("sol.py")).unwrap();
        assert_eq!(spec.name, "python");

        let spec = resolve_language(&registry, Some("C++"), Path::new("sol.txt")).unwrap();
        assert_eq!(spec.name, "cpp");

        assert!(resolve_language(&registry, None, Path::new("sol.txt")).is_err());
        assert!(resolve_language(&registry, Some("cobol"), Path::new("sol.cob")).is_err());
    }

    #[test]
    fn test_resolve_user_prefers_explicit() {
        assert_eq!(resolve_user(Some("bob".to_string())), "bob");
        assert!(!resolve_user(None).is_empty());
    }

    #[test]
    fn test_run_json_shape() {
        let result = ExecutionResult {
            stdout: b"42\n".to_vec(),
            exit_code: Some(0),
            wall_time: Duration::from_millis(12),
            ..Default::default()
        };
        let json = run_json(&result);
        assert_eq!(json["stdout"], "42\n");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["wall_time_ms"], 12);
        assert_eq!(json["timed_out"], false);
    }
}
