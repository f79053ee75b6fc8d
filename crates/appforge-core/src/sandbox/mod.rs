//! Isolated build/test validation of workspace snapshots.
//!
//! A sandbox materializes a snapshot into a disposable execution
//! environment, runs the build and test commands under a timeout, and
//! reports a structured verdict. Script failures are ordinary results
//! fed back to the state machine; only backend faults (Docker
//! unreachable) are errors, and those are retried with bounded backoff
//! before surfacing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, RetryPolicy};
use crate::errors::{AgentError, SandboxError};
use crate::snapshot::WorkspaceSnapshot;

pub mod docker;

pub use docker::DockerSandbox;

/// Outcome of one sandbox validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxResult {
    /// Whether all commands exited successfully within the timeout.
    pub passed: bool,
    /// Captured stdout and stderr, interleaved.
    pub logs: String,
    /// Exit code of the command chain, if it ran to completion.
    pub exit_code: Option<i64>,
    /// Whether the combined timeout elapsed before completion.
    pub duration_exceeded: bool,
}

impl SandboxResult {
    pub fn timed_out(logs: String) -> Self {
        Self {
            passed: false,
            logs,
            exit_code: None,
            duration_exceeded: true,
        }
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Materialize `snapshot` into a fresh isolated environment and run
    /// `commands` in sequence under `timeout`.
    async fn validate(
        &self,
        snapshot: &WorkspaceSnapshot,
        commands: &[String],
        timeout: Duration,
    ) -> Result<SandboxResult, SandboxError>;

    /// Probe the execution backend, for the liveness endpoint.
    async fn health(&self) -> Result<(), SandboxError>;
}

/// Bounded pool of sandbox execution slots shared by all sessions.
/// Saturated validations queue on the semaphore; nothing is dropped.
#[derive(Clone)]
pub struct SandboxPool {
    slots: Arc<tokio::sync::Semaphore>,
}

impl SandboxPool {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: Arc::new(tokio::sync::Semaphore::new(slots)),
        }
    }

    /// Wait for a free execution slot. The permit is released on every
    /// exit path, including cancellation, when the guard drops.
    pub async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit, SandboxError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolClosed)
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Run `operation`, retrying transient infrastructure failures with
/// bounded exponential backoff through the injected clock. Any
/// non-transient error surfaces immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    clock: &dyn Clock,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "Transient failure (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    err
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
