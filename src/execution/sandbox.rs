//! Sandbox manager: one isolated execution of untrusted code.
//!
//! Each [`SandboxManager::run`] call builds an ephemeral image holding the
//! source and input on top of the language's base image, starts a locked
//! down container from it, waits with a wall-clock deadline, collects
//! output and peak memory, and removes both container and image before
//! returning, on every exit path.
//!
//! Infrastructure failures never escape as errors: they are reported in
//! [`ExecutionResult::internal_error`] so the caller always gets a
//! structured outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DockerError;
use crate::execution::languages::{
    LanguageRegistry, LanguageSpec, BUILD_FAILURE_EXIT_CODE, BUILD_FAILURE_MARKER, INPUT_FILE_NAME,
    WORKSPACE_DIR,
};
use crate::execution::resources::ResourceLimits;
use crate::execution::runtime::{ProcessHandle, ProcessSpec, ResourceUsage, SandboxRuntime};
use crate::metrics::MetricsCollector;

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output, complete so it can be judged.
    pub stdout: Vec<u8>,
    /// Captured standard error, truncated to the configured output limit.
    pub stderr: Vec<u8>,
    /// Exit code, absent when the process was killed at the deadline or never ran.
    pub exit_code: Option<i64>,
    /// Real time between container start and exit (or kill).
    pub wall_time: Duration,
    /// Highest memory usage recorded during the run.
    pub peak_memory_bytes: u64,
    /// Whether the wall-clock deadline forced termination.
    pub timed_out: bool,
    /// Whether the kernel OOM killer terminated the process.
    pub oom_killed: bool,
    /// Whether the language's build step failed.
    pub build_failed: bool,
    /// Set when the sandbox itself failed (daemon unreachable, image fetch, ...).
    pub internal_error: Option<String>,
}

impl ExecutionResult {
    /// Result describing an infrastructure failure.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            internal_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Standard output as text.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Tunables of the sandbox manager.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Repository name of ephemeral run images, also the container name prefix.
    pub image_prefix: String,
    /// Process-count ceiling inside the container.
    pub pids_limit: i64,
    /// Captured stderr, and program output kept for reporting, are cut to
    /// this many bytes. Judging always sees the complete stdout.
    pub max_output_bytes: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            image_prefix: "elitecode-run".to_string(),
            pids_limit: 64,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Runs source code in isolated containers.
pub struct SandboxManager {
    runtime: Arc<dyn SandboxRuntime>,
    languages: Arc<LanguageRegistry>,
    options: SandboxOptions,
    /// Base images known to be present. Append-only; concurrent ensures of
    /// the same image share one fetch.
    base_images: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    metrics: MetricsCollector,
}

impl SandboxManager {
    /// Creates a sandbox manager over the given runtime.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        languages: Arc<LanguageRegistry>,
        options: SandboxOptions,
    ) -> Self {
        Self {
            runtime,
            languages,
            options,
            base_images: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    /// The language registry runs are resolved against.
    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Executes `source_code` against `input` under `limits`.
    ///
    /// Never fails: unsupported languages and runtime trouble come back as
    /// an `internal_error` result.
    pub async fn run(
        &self,
        language: &str,
        source_code: &str,
        input: &str,
        limits: &ResourceLimits,
    ) -> ExecutionResult {
        let spec = match self.languages.resolve(language) {
            Ok(spec) => spec,
            Err(e) => return ExecutionResult::internal_error(e.to_string()),
        };

        let run_id = Uuid::new_v4().simple().to_string();
        let started = Instant::now();
        let _in_flight = self.metrics.sandbox_in_flight();

        let mut scope = RunScope::new(Arc::clone(&self.runtime));
        let outcome = self
            .execute(&mut scope, spec, &run_id, source_code, input, limits)
            .await;
        scope.release().await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(run = %run_id, language = %spec.name, error = %e, "Sandbox run failed");
                ExecutionResult::internal_error(e.to_string())
            }
        };

        self.metrics.record_sandbox_run(
            &spec.name,
            started.elapsed().as_secs_f64(),
            result.timed_out,
        );

        result
    }

    async fn execute(
        &self,
        scope: &mut RunScope,
        spec: &LanguageSpec,
        run_id: &str,
        source_code: &str,
        input: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, DockerError> {
        self.ensure_base_image(&spec.image).await?;

        let context = build_context(spec, source_code, input)?;
        let tag = format!("{}:{}", self.options.image_prefix, run_id);
        scope.image = Some(tag.clone());
        self.runtime.build_image(&tag, context).await?;

        let process_spec = ProcessSpec {
            name: format!("{}-{}", self.options.image_prefix.replace('/', "-"), run_id),
            image: tag,
            cmd: spec.command(),
            working_dir: WORKSPACE_DIR.to_string(),
            limits: *limits,
            pids_limit: self.options.pids_limit,
            network_disabled: true,
        };

        let handle = self.runtime.create_process(&process_spec).await?;
        scope.process = Some(handle.clone());

        self.runtime.start(&handle).await?;
        let started = Instant::now();

        let waited = tokio::time::timeout(limits.wall_clock_limit, self.runtime.wait(&handle)).await;
        let (status, timed_out) = match waited {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                debug!(container = %handle.name, "Wall-clock limit reached, killing");
                self.runtime.kill(&handle).await?;
                (None, true)
            }
        };
        let wall_time = started.elapsed();

        let usage = self.runtime.stats(&handle).await.unwrap_or_else(|e| {
            warn!(container = %handle.name, error = %e, "Memory usage unavailable");
            ResourceUsage::default()
        });
        let output = self.runtime.output(&handle).await?;

        let exit_code = status.map(|s| s.exit_code);
        let (stderr, marked) = strip_build_marker(output.stderr);
        let build_failed =
            spec.has_build_step() && marked && exit_code == Some(BUILD_FAILURE_EXIT_CODE);

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: truncate_output(stderr, self.options.max_output_bytes),
            exit_code,
            wall_time,
            peak_memory_bytes: usage.peak_memory_bytes,
            timed_out,
            oom_killed: status.is_some_and(|s| s.oom_killed),
            build_failed,
            internal_error: None,
        })
    }

    async fn ensure_base_image(&self, image: &str) -> Result<(), DockerError> {
        let cell = {
            let mut images = match self.base_images.lock() {
                Ok(images) => images,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(images.entry(image.to_string()).or_default())
        };

        cell.get_or_try_init(|| self.runtime.ensure_image(image))
            .await
            .map(|_| ())
    }
}

/// Resources acquired by one run, released exactly once.
///
/// [`RunScope::release`] is the normal path. If the run future is dropped
/// mid-flight the `Drop` impl hands whatever is left to a background task.
struct RunScope {
    runtime: Arc<dyn SandboxRuntime>,
    image: Option<String>,
    process: Option<ProcessHandle>,
}

impl RunScope {
    fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            runtime,
            image: None,
            process: None,
        }
    }

    async fn release(&mut self) {
        release_resources(self.runtime.as_ref(), self.process.take(), self.image.take()).await;
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if self.process.is_none() && self.image.is_none() {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let process = self.process.take();
        let image = self.image.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_resources(runtime.as_ref(), process, image).await;
                });
            }
            Err(_) => warn!(?process, ?image, "No async runtime left to release sandbox"),
        }
    }
}

async fn release_resources(
    runtime: &dyn SandboxRuntime,
    process: Option<ProcessHandle>,
    image: Option<String>,
) {
    if let Some(handle) = process {
        if let Err(e) = runtime.destroy(&handle).await {
            warn!(container = %handle.name, error = %e, "Failed to remove container");
        }
    }

    if let Some(tag) = image {
        if let Err(e) = runtime.remove_image(&tag).await {
            warn!(image = %tag, error = %e, "Failed to remove run image");
        }
    }
}

/// Tar build context: Dockerfile, source file and input.
fn build_context(spec: &LanguageSpec, source_code: &str, input: &str) -> Result<Vec<u8>, DockerError> {
    let dockerfile = format!(
        "FROM {}\nWORKDIR {WORKSPACE_DIR}\nCOPY . {WORKSPACE_DIR}/\n",
        spec.image
    );

    let mut builder = tar::Builder::new(Vec::new());
    append_file(&mut builder, "Dockerfile", dockerfile.as_bytes())?;
    append_file(&mut builder, &spec.source_file, source_code.as_bytes())?;
    append_file(&mut builder, INPUT_FILE_NAME, input.as_bytes())?;

    builder
        .into_inner()
        .map_err(|e| DockerError::Context(e.to_string()))
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    data: &[u8],
) -> Result<(), DockerError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);

    builder
        .append_data(&mut header, name, data)
        .map_err(|e| DockerError::Context(format!("{name}: {e}")))
}

/// Removes the build-failure marker line from the end of `stderr`.
///
/// Returns whether it was there.
fn strip_build_marker(mut stderr: Vec<u8>) -> (Vec<u8>, bool) {
    let marker = BUILD_FAILURE_MARKER.as_bytes();

    let mut end = stderr.len();
    while end > 0 && stderr[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if !stderr[..end].ends_with(marker) {
        return (stderr, false);
    }

    let start = end - marker.len();
    if start > 0 && stderr[start - 1] != b'\n' {
        return (stderr, false);
    }

    stderr.truncate(start);
    (stderr, true)
}

fn truncate_output(mut bytes: Vec<u8>, max: usize) -> Vec<u8> {
    if bytes.len() > max {
        bytes.truncate(max);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::runtime::{ProcessOutput, WaitStatus};
    use async_trait::async_trait;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Script {
        Exit {
            code: i64,
            stdout: &'static str,
            stderr: &'static str,
            peak: u64,
        },
        Hang,
        FailPull,
        FailBuild,
    }

    struct FakeRuntime {
        script: Script,
        calls: Mutex<Vec<String>>,
        pulls: AtomicUsize,
    }

    impl FakeRuntime {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
                pulls: AtomicUsize::new(0),
            })
        }

        fn log(&self, call: &str) {
            self.calls.lock().expect("lock poisoned").push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl SandboxRuntime for FakeRuntime {
        async fn ensure_image(&self, image: &str) -> Result<(), DockerError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.log("ensure_image");
            match self.script {
                Script::FailPull => Err(DockerError::PullFailed {
                    image: image.to_string(),
                    reason: "registry unreachable".to_string(),
                }),
                _ => Ok(()),
            }
        }

        async fn build_image(&self, _tag: &str, _context: Vec<u8>) -> Result<(), DockerError> {
            self.log("build_image");
            match self.script {
                Script::FailBuild => Err(DockerError::BuildFailed("no space left".to_string())),
                _ => Ok(()),
            }
        }

        async fn remove_image(&self, _tag: &str) -> Result<(), DockerError> {
            self.log("remove_image");
            Ok(())
        }

        async fn create_process(&self, spec: &ProcessSpec) -> Result<ProcessHandle, DockerError> {
            self.log("create_process");
            assert!(spec.network_disabled);
            Ok(ProcessHandle {
                id: "c0ffee".to_string(),
                name: spec.name.clone(),
            })
        }

        async fn start(&self, _handle: &ProcessHandle) -> Result<(), DockerError> {
            self.log("start");
            Ok(())
        }

        async fn wait(&self, _handle: &ProcessHandle) -> Result<WaitStatus, DockerError> {
            self.log("wait");
            match self.script {
                Script::Exit { code, .. } => Ok(WaitStatus {
                    exit_code: code,
                    oom_killed: false,
                }),
                _ => std::future::pending().await,
            }
        }

        async fn kill(&self, _handle: &ProcessHandle) -> Result<(), DockerError> {
            self.log("kill");
            Ok(())
        }

        async fn stats(&self, _handle: &ProcessHandle) -> Result<ResourceUsage, DockerError> {
            let peak = match self.script {
                Script::Exit { peak, .. } => peak,
                _ => 1024,
            };
            Ok(ResourceUsage {
                peak_memory_bytes: peak,
            })
        }

        async fn output(&self, _handle: &ProcessHandle) -> Result<ProcessOutput, DockerError> {
            match &self.script {
                Script::Exit { stdout, stderr, .. } => Ok(ProcessOutput {
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: stderr.as_bytes().to_vec(),
                }),
                _ => Ok(ProcessOutput::default()),
            }
        }

        async fn destroy(&self, _handle: &ProcessHandle) -> Result<(), DockerError> {
            self.log("destroy");
            Ok(())
        }
    }

    fn manager(runtime: Arc<FakeRuntime>) -> SandboxManager {
        SandboxManager::new(
            runtime,
            Arc::new(LanguageRegistry::builtin()),
            SandboxOptions::default(),
        )
    }

    fn limits(wall_ms: u64) -> ResourceLimits {
        ResourceLimits::new(134_217_728, 1_000_000_000, Duration::from_millis(wall_ms))
    }

    #[tokio::test]
    async fn test_successful_run_collects_output_and_cleans_up() {
        let runtime = FakeRuntime::new(Script::Exit {
            code: 0,
            stdout: "4\n",
            stderr: "",
            peak: 3 * 1024 * 1024,
        });
        let result = manager(runtime.clone())
            .run("python", "print(2+2)", "", &limits(2000))
            .await;

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout_lossy(), "4\n");
        assert_eq!(result.peak_memory_bytes, 3 * 1024 * 1024);
        assert!(!result.timed_out);
        assert!(result.internal_error.is_none());

        let calls = runtime.calls();
        assert!(calls.contains(&"destroy".to_string()));
        assert!(calls.contains(&"remove_image".to_string()));
        assert!(!calls.contains(&"kill".to_string()));
    }

    #[tokio::test]
    async fn test_deadline_kills_and_marks_timeout() {
        let runtime = FakeRuntime::new(Script::Hang);
        let started = Instant::now();
        let result = manager(runtime.clone())
            .run("c", "int main(){for(;;);}", "", &limits(50))
            .await;

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(!result.build_failed);
        assert!(started.elapsed() < Duration::from_secs(5));

        let calls = runtime.calls();
        assert!(calls.contains(&"kill".to_string()));
        assert!(calls.contains(&"destroy".to_string()));
        assert!(calls.contains(&"remove_image".to_string()));
    }

    #[tokio::test]
    async fn test_build_exit_code_marks_compile_failure_for_compiled_languages() {
        let runtime = FakeRuntime::new(Script::Exit {
            code: BUILD_FAILURE_EXIT_CODE,
            stdout: "",
            stderr: "main.c:1: error: expected ';'\n__ELITECODE_BUILD_FAILED__\n",
            peak: 0,
        });
        let manager = manager(runtime);

        let c = manager.run("c", "int main(){", "", &limits(2000)).await;
        assert!(c.build_failed);
        assert_eq!(c.stderr_lossy(), "main.c:1: error: expected ';'\n");

        let py = manager.run("python", "exit(97)", "", &limits(2000)).await;
        assert!(!py.build_failed);
        assert_eq!(py.exit_code, Some(BUILD_FAILURE_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_image_build_failure_is_internal_and_cleans_up() {
        let runtime = FakeRuntime::new(Script::FailBuild);
        let result = manager(runtime.clone())
            .run("cpp", "int main(){}", "", &limits(2000))
            .await;

        assert!(result.internal_error.unwrap().contains("no space left"));
        let calls = runtime.calls();
        assert!(!calls.contains(&"create_process".to_string()));
        assert!(calls.contains(&"remove_image".to_string()));
    }

    #[tokio::test]
    async fn test_pull_failure_is_internal() {
        let runtime = FakeRuntime::new(Script::FailPull);
        let result = manager(runtime.clone())
            .run("go", "package main", "", &limits(2000))
            .await;

        assert!(result.internal_error.is_some());
        assert!(!runtime.calls().contains(&"build_image".to_string()));
    }

    #[tokio::test]
    async fn test_unsupported_language_is_internal() {
        let runtime = FakeRuntime::new(Script::Hang);
        let result = manager(runtime.clone())
            .run("brainfuck", "+", "", &limits(2000))
            .await;

        assert!(result
            .internal_error
            .unwrap()
            .contains("Unsupported language"));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_base_image_fetched_once() {
        let runtime = FakeRuntime::new(Script::Exit {
            code: 0,
            stdout: "",
            stderr: "",
            peak: 0,
        });
        let manager = manager(runtime.clone());

        manager.run("python", "", "", &limits(2000)).await;
        manager.run("python", "", "", &limits(2000)).await;
        manager.run("py", "", "", &limits(2000)).await;

        assert_eq!(runtime.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_program_exiting_97_is_not_a_build_failure() {
        let runtime = FakeRuntime::new(Script::Exit {
            code: BUILD_FAILURE_EXIT_CODE,
            stdout: "",
            stderr: "bye\n",
            peak: 0,
        });

        let result = manager(runtime).run("cpp", "int main(){return 97;}", "", &limits(2000)).await;
        assert!(!result.build_failed);
        assert_eq!(result.exit_code, Some(BUILD_FAILURE_EXIT_CODE));
        assert_eq!(result.stderr_lossy(), "bye\n");
    }

    #[tokio::test]
    async fn test_stderr_is_truncated_but_stdout_is_complete() {
        let runtime = FakeRuntime::new(Script::Exit {
            code: 0,
            stdout: "0123456789",
            stderr: "abcdefghij",
            peak: 0,
        });
        let manager = SandboxManager::new(
            runtime,
            Arc::new(LanguageRegistry::builtin()),
            SandboxOptions {
                max_output_bytes: 4,
                ..Default::default()
            },
        );

        let result = manager.run("python", "", "", &limits(2000)).await;
        assert_eq!(result.stdout, b"0123456789".to_vec());
        assert_eq!(result.stderr, b"abcd".to_vec());
    }

    #[tokio::test]
    async fn test_build_marker_survives_long_diagnostics() {
        let diagnostics: &'static str = Box::leak(
            format!("{}\n__ELITECODE_BUILD_FAILED__\n", "error: x\n".repeat(20_000)).into_boxed_str(),
        );
        let runtime = FakeRuntime::new(Script::Exit {
            code: BUILD_FAILURE_EXIT_CODE,
            stdout: "",
            stderr: diagnostics,
            peak: 0,
        });

        let result = manager(runtime).run("go", "package main", "", &limits(2000)).await;
        assert!(result.build_failed);
        assert_eq!(result.stderr.len(), SandboxOptions::default().max_output_bytes);
    }

    #[test]
    fn test_strip_build_marker() {
        let (rest, marked) = strip_build_marker(b"oops\n__ELITECODE_BUILD_FAILED__\n".to_vec());
        assert!(marked);
        assert_eq!(rest, b"oops\n".to_vec());

        let (rest, marked) = strip_build_marker(b"__ELITECODE_BUILD_FAILED__".to_vec());
        assert!(marked);
        assert!(rest.is_empty());

        let (rest, marked) = strip_build_marker(b"x__ELITECODE_BUILD_FAILED__\n".to_vec());
        assert!(!marked);
        assert_eq!(rest, b"x__ELITECODE_BUILD_FAILED__\n".to_vec());

        let (_, marked) = strip_build_marker(Vec::new());
        assert!(!marked);
    }

    #[tokio::test]
    async fn test_dropped_run_still_releases_container() {
        let runtime = FakeRuntime::new(Script::Hang);
        let manager = manager(runtime.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(30),
            manager.run("python", "while True: pass", "", &limits(60_000)),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls = runtime.calls();
        assert!(calls.contains(&"destroy".to_string()));
        assert!(calls.contains(&"remove_image".to_string()));
    }

    #[test]
    fn test_build_context_contains_source_and_input() {
        let registry = LanguageRegistry::builtin();
        let spec = registry.resolve("java").unwrap();
        let context = build_context(spec, "class Main {}", "1 2\n").unwrap();

        let mut archive = tar::Archive::new(context.as_slice());
        let mut files = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().display().to_string();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            files.insert(path, content);
        }

        assert_eq!(files["Main.java"], "class Main {}");
        assert_eq!(files["input.txt"], "1 2\n");
        assert!(files["Dockerfile"].starts_with("FROM eclipse-temurin:21-jdk\n"));
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output(b"abc".to_vec(), 10), b"abc".to_vec());
        assert_eq!(truncate_output(b"abcdef".to_vec(), 2), b"ab".to_vec());
    }
}
