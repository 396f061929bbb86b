//! Docker API wrapper using the bollard crate.
//!
//! Implements [`SandboxRuntime`] on top of the local Docker daemon:
//! image pull/build/removal, container lifecycle, memory sampling and
//! log collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::{ContainerState, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::DockerError;
use crate::execution::runtime::{
    ProcessHandle, ProcessOutput, ProcessSpec, ResourceUsage, SandboxRuntime, WaitStatus,
};

/// Background task streaming container stats and keeping the peak memory.
///
/// The daemon emits a sample about once per second and `max_usage` is not
/// reported on cgroup v2, so runs shorter than one interval may record a
/// peak of 0.
struct MemorySampler {
    peak: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

/// Docker client wrapper for sandbox operations.
pub struct DockerClient {
    docker: Docker,
    samplers: Mutex<HashMap<String, MemorySampler>>,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::from_docker(docker))
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Pulls a Docker image from a registry.
    pub async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            result.map_err(|e| DockerError::PullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn inspect_state(&self, id: &str) -> Result<ContainerState, DockerError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    DockerError::ContainerNotFound { id: id.to_string() }
                } else {
                    DockerError::RunFailed(format!("Failed to inspect container: {e}"))
                }
            })?;

        info.state
            .ok_or_else(|| DockerError::RunFailed("Container has no state".to_string()))
    }

    fn take_sampler(&self, id: &str) -> Option<MemorySampler> {
        self.samplers
            .lock()
            .map(|mut samplers| samplers.remove(id))
            .unwrap_or(None)
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Host-side constraints for a sandboxed container.
fn host_config(spec: &ProcessSpec) -> HostConfig {
    HostConfig {
        memory: Some(spec.limits.memory_bytes),
        // Same value as memory: no swap on top of the ceiling.
        memory_swap: Some(spec.limits.memory_bytes),
        nano_cpus: Some(spec.limits.cpu_nano_units),
        pids_limit: Some(spec.pids_limit),
        network_mode: spec.network_disabled.then(|| "none".to_string()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    }
}

/// Container configuration for a sandboxed process.
fn container_config(spec: &ProcessSpec) -> Config<String> {
    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        working_dir: Some(spec.working_dir.clone()),
        network_disabled: Some(spec.network_disabled),
        host_config: Some(host_config(spec)),
        // Without a TTY the log stream keeps stdout and stderr apart.
        tty: Some(false),
        attach_stdin: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl SandboxRuntime for DockerClient {
    async fn ensure_image(&self, image: &str) -> Result<(), DockerError> {
        if self.image_exists(image).await {
            return Ok(());
        }

        info!(image = image, "Pulling base image");
        self.pull_image(image).await
    }

    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<(), DockerError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| DockerError::BuildFailed(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(DockerError::BuildFailed(error));
            }
        }

        debug!(image = tag, "Built run image");
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), DockerError> {
        let options = RemoveImageOptions {
            force: true,
            noprune: false,
        };

        match self.docker.remove_image(tag, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(DockerError::CleanupFailed {
                target: tag.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn create_process(&self, spec: &ProcessSpec) -> Result<ProcessHandle, DockerError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;

        Ok(ProcessHandle {
            id: response.id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, handle: &ProcessHandle) -> Result<(), DockerError> {
        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")))?;

        let peak = Arc::new(AtomicU64::new(0));
        let docker = self.docker.clone();
        let id = handle.id.clone();
        let recorder = Arc::clone(&peak);

        let task = tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                one_shot: false,
            };
            let mut stats = docker.stats(&id, Some(options));
            while let Some(Ok(sample)) = stats.next().await {
                let memory = &sample.memory_stats;
                let observed = memory.usage.unwrap_or(0).max(memory.max_usage.unwrap_or(0));
                recorder.fetch_max(observed, Ordering::Relaxed);
            }
        });

        if let Ok(mut samplers) = self.samplers.lock() {
            samplers.insert(handle.id.clone(), MemorySampler { peak, task });
        }

        Ok(())
    }

    async fn wait(&self, handle: &ProcessHandle) -> Result<WaitStatus, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(&handle.id, Some(options));

        let exit_code = match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(DockerError::RunFailed(format!(
                    "Error waiting for container: {e}"
                )))
            }
            None => self.inspect_state(&handle.id).await?.exit_code.unwrap_or(-1),
        };

        let oom_killed = self
            .inspect_state(&handle.id)
            .await?
            .oom_killed
            .unwrap_or(false);

        Ok(WaitStatus {
            exit_code,
            oom_killed,
        })
    }

    async fn kill(&self, handle: &ProcessHandle) -> Result<(), DockerError> {
        let options = KillContainerOptions { signal: "SIGKILL" };

        match self.docker.kill_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already exited between the deadline and the kill.
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(DockerError::RunFailed(format!(
                "Failed to kill container: {e}"
            ))),
        }
    }

    async fn stats(&self, handle: &ProcessHandle) -> Result<ResourceUsage, DockerError> {
        let sampler = self.take_sampler(&handle.id).ok_or_else(|| {
            DockerError::RunFailed(format!("No stats recorded for container {}", handle.name))
        })?;

        sampler.task.abort();

        Ok(ResourceUsage {
            peak_memory_bytes: sampler.peak.load(Ordering::Relaxed),
        })
    }

    async fn output(&self, handle: &ProcessHandle) -> Result<ProcessOutput, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(&handle.id, Some(options));
        let mut output = ProcessOutput::default();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => output.stdout.extend_from_slice(&message),
                Ok(LogOutput::StdErr { message }) => output.stderr.extend_from_slice(&message),
                Ok(_) => {}
                Err(e) => {
                    return Err(DockerError::OutputFailed(e.to_string()));
                }
            }
        }

        Ok(output)
    }

    async fn destroy(&self, handle: &ProcessHandle) -> Result<(), DockerError> {
        if let Some(sampler) = self.take_sampler(&handle.id) {
            sampler.task.abort();
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(DockerError::CleanupFailed {
                target: handle.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::resources::ResourceLimits;
    use std::time::Duration;

    fn spec() -> ProcessSpec {
        ProcessSpec {
            name: "elitecode-run-test".to_string(),
            image: "elitecode-run:test".to_string(),
            cmd: vec!["sh".to_string(), "-c".to_string(), "./main < input.txt".to_string()],
            working_dir: "/workspace".to_string(),
            limits: ResourceLimits::new(256 * 1024 * 1024, 500_000_000, Duration::from_secs(2)),
            pids_limit: 64,
            network_disabled: true,
        }
    }

    #[test]
    fn test_host_config_applies_limits() {
        let host = host_config(&spec());

        assert_eq!(host.memory, Some(268_435_456));
        assert_eq!(host.memory_swap, Some(268_435_456));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
    }

    #[test]
    fn test_host_config_network_enabled() {
        let mut spec = spec();
        spec.network_disabled = false;
        assert!(host_config(&spec).network_mode.is_none());
    }

    #[test]
    fn test_container_config_separates_streams() {
        let config = container_config(&spec());

        assert_eq!(config.image.as_deref(), Some("elitecode-run:test"));
        assert_eq!(config.tty, Some(false));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(config.cmd.unwrap().len(), 3);
    }
}
