//! Container runtime boundary used by the sandbox manager.
//!
//! The judging engine depends only on this narrow capability set, so tests
//! can substitute a fake for the Docker daemon.

use async_trait::async_trait;

use crate::error::DockerError;
use crate::execution::resources::ResourceLimits;

/// Everything needed to create one isolated process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Unique container name.
    pub name: String,
    /// Image to start from.
    pub image: String,
    /// Command to run.
    pub cmd: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Resource ceilings.
    pub limits: ResourceLimits,
    /// Maximum number of processes inside the container.
    pub pids_limit: i64,
    /// Whether network access is disabled.
    pub network_disabled: bool,
}

/// Handle to a created isolated process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    /// Runtime-assigned identifier.
    pub id: String,
    /// Name given at creation.
    pub name: String,
}

/// How an isolated process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus {
    /// Process exit code.
    pub exit_code: i64,
    /// Whether the kernel OOM killer terminated the process.
    pub oom_killed: bool,
}

/// Resource usage recorded during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Highest memory usage observed, in bytes.
    pub peak_memory_bytes: u64,
}

/// Output captured from an isolated process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Capabilities the sandbox manager needs from a container runtime.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Makes sure `image` is available locally, fetching it if absent.
    async fn ensure_image(&self, image: &str) -> Result<(), DockerError>;

    /// Builds `tag` from a tar build context.
    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<(), DockerError>;

    /// Removes an image built by [`SandboxRuntime::build_image`].
    async fn remove_image(&self, tag: &str) -> Result<(), DockerError>;

    /// Creates (but does not start) an isolated process.
    async fn create_process(&self, spec: &ProcessSpec) -> Result<ProcessHandle, DockerError>;

    /// Starts a created process and begins recording its resource usage.
    async fn start(&self, handle: &ProcessHandle) -> Result<(), DockerError>;

    /// Blocks until the process exits.
    async fn wait(&self, handle: &ProcessHandle) -> Result<WaitStatus, DockerError>;

    /// Forcibly terminates the process.
    async fn kill(&self, handle: &ProcessHandle) -> Result<(), DockerError>;

    /// Resource usage recorded since [`SandboxRuntime::start`].
    async fn stats(&self, handle: &ProcessHandle) -> Result<ResourceUsage, DockerError>;

    /// Collects stdout and stderr.
    async fn output(&self, handle: &ProcessHandle) -> Result<ProcessOutput, DockerError>;

    /// Removes the process and anything attached to it.
    async fn destroy(&self, handle: &ProcessHandle) -> Result<(), DockerError>;
}
