// src/sandbox/docker.rs
use bollard::container::LogOutput;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    StopContainerOptions as BollardStopContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::default::Default;
use std::time::Duration;
use async_trait::async_trait;
use tempfile::Builder;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{SandboxExecutor, SandboxResult};
use crate::errors::SandboxError;
use crate::snapshot::WorkspaceSnapshot;

const CONTAINER_WORK_DIR: &str = "/workspace";

/// Stops the container if the validation future is dropped before the
/// container has run to completion, e.g. when the client disconnects
/// mid-stream. The bind-mounted workspace is held until the stop
/// completes so the container never runs over a deleted directory.
struct ContainerGuard {
    docker: Docker,
    id: String,
    workspace: Option<tempfile::TempDir>,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, id: String, workspace: tempfile::TempDir) -> Self {
        Self {
            docker,
            id,
            workspace: Some(workspace),
            armed: true,
        }
    }

    /// Call once the container has exited (or was stopped explicitly);
    /// the workspace is then freed on the normal drop path.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let id = self.id.clone();
        let workspace = self.workspace.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match docker
                    .stop_container(&id, None::<BollardStopContainerOptionsQuery>)
                    .await
                {
                    Ok(()) => log::info!("Stopped abandoned validation container {}", id),
                    Err(e) => log::debug!("Failed to stop abandoned container {}: {}", id, e),
                }
                drop(workspace);
            });
        }
    }
}

/// Docker-backed sandbox. Each validation gets a fresh auto-removed
/// container over a tempdir bind mount; nothing is shared between
/// concurrent sessions.
pub struct DockerSandbox {
    docker: Docker,
    image: String,
}

impl DockerSandbox {
    pub fn new(image: impl Into<String>) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    /// Write the snapshot into a host tempdir that will be bind-mounted
    /// as the container workspace.
    async fn materialize(
        &self,
        snapshot: &WorkspaceSnapshot,
    ) -> Result<tempfile::TempDir, SandboxError> {
        let temp_dir = Builder::new().prefix("appforge-sandbox-").tempdir()?;
        for (path, content) in snapshot.iter() {
            let host_path = temp_dir.path().join(path);
            if let Some(parent) = host_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = fs::File::create(&host_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(temp_dir)
    }
}

#[async_trait]
impl SandboxExecutor for DockerSandbox {
    async fn validate(
        &self,
        snapshot: &WorkspaceSnapshot,
        commands: &[String],
        timeout: Duration,
    ) -> Result<SandboxResult, SandboxError> {
        let temp_dir = self.materialize(snapshot).await?;
        let host_dir = temp_dir
            .path()
            .to_str()
            .ok_or_else(|| SandboxError::Provision("invalid temp path".to_string()))?
            .to_string();

        // Build then test in one shell so a build failure short-circuits.
        let script = commands.join(" && ");
        let cmd = vec!["sh".to_string(), "-c".to_string(), script];

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("appforge-validate-{}", Uuid::new_v4())),
            ..Default::default()
        });

        let config = ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(cmd),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:{}", host_dir, CONTAINER_WORK_DIR)]),
                auto_remove: Some(true),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let container = self.docker.create_container(options, config).await?;
        let mut guard = ContainerGuard::new(self.docker.clone(), container.id.clone(), temp_dir);
        self.docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await?;

        let mut wait_stream = self
            .docker
            .wait_container(&container.id, None::<BollardWaitContainerOptionsQuery>);
        let timeout_future = tokio::time::sleep(timeout);

        let wait_outcome = tokio::select! {
            res = wait_stream.next() => res,
            _ = timeout_future => {
                log::warn!("Validation timed out for container {}", container.id);
                let _ = self
                    .docker
                    .stop_container(&container.id, None::<BollardStopContainerOptionsQuery>)
                    .await;
                let logs = self.collect_logs(&container.id).await.unwrap_or_default();
                guard.disarm();
                return Ok(SandboxResult::timed_out(logs));
            }
        };

        // `wait_container` yields an error item for non-zero exits on
        // some backends; a script failure is a reportable result either
        // way, so fold both into the exit code.
        let exit_code = match wait_outcome {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(SandboxError::Backend(e)),
            None => {
                return Err(SandboxError::Provision(
                    "container wait stream ended unexpectedly".to_string(),
                ))
            }
        };

        let logs = self.collect_logs(&container.id).await.unwrap_or_default();
        guard.disarm();

        Ok(SandboxResult {
            passed: exit_code == 0,
            logs,
            exit_code: Some(exit_code),
            duration_exceeded: false,
        })
    }

    async fn health(&self) -> Result<(), SandboxError> {
        self.docker.ping().await?;
        Ok(())
    }
}

impl DockerSandbox {
    async fn collect_logs(&self, container_id: &str) -> Result<String, SandboxError> {
        let mut output_stream = self.docker.logs(
            container_id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut logs = String::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    logs.push_str(std::str::from_utf8(&message)?)
                }
                Ok(_) => {}
                Err(e) => return Err(SandboxError::Backend(e)),
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disarmed_guard_frees_workspace_on_drop() {
        let Ok(docker) = Docker::connect_with_local_defaults() else {
            return;
        };
        let workspace = tempfile::tempdir().unwrap();
        let path = workspace.path().to_path_buf();

        let mut guard = ContainerGuard::new(docker, "appforge-test".to_string(), workspace);
        guard.disarm();
        assert!(path.exists());
        drop(guard);
        // Disarmed drop takes the normal path and removes the tempdir.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn armed_guard_keeps_workspace_alive_past_drop() {
        let Ok(docker) = Docker::connect_with_local_defaults() else {
            return;
        };
        let workspace = tempfile::tempdir().unwrap();
        let path = workspace.path().to_path_buf();

        let guard = ContainerGuard::new(docker, "appforge-test-missing".to_string(), workspace);
        drop(guard);
        // The workspace outlives the drop until the spawned stop task
        // has run; that task also survives a missing container.
        assert!(path.exists());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }
}
