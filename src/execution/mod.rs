//! Sandboxed execution of untrusted code.
//!
//! ```text
//! ResourceLimits ──► SandboxManager ──► SandboxRuntime (DockerClient)
//!                         │
//!                         └──► ExecutionResult
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use elitecode_judge::execution::{
//!     DockerClient, LanguageRegistry, ResourceLimits, SandboxManager, SandboxOptions,
//! };
//!
//! let runtime = Arc::new(DockerClient::new()?);
//! let sandbox = SandboxManager::new(runtime, Arc::new(LanguageRegistry::builtin()), SandboxOptions::default());
//! let result = sandbox.run("python", "print(input())", "hi\n", &ResourceLimits::default()).await;
//! assert_eq!(result.stdout_lossy().trim(), "hi");
//! ```

pub mod docker_client;
pub mod languages;
pub mod resources;
pub mod runtime;
pub mod sandbox;

pub use docker_client::DockerClient;
pub use languages::{LanguageRegistry, LanguageSpec, BUILD_FAILURE_EXIT_CODE, BUILD_FAILURE_MARKER};
pub use resources::{parse_cpu, parse_memory, ResourceLimits};
pub use runtime::{
    ProcessHandle, ProcessOutput, ProcessSpec, ResourceUsage, SandboxRuntime, WaitStatus,
};
pub use sandbox::{ExecutionResult, SandboxManager, SandboxOptions};
