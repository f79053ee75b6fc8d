//! Shared test doubles: a recording clock and scripted collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::errors::{AgentError, SandboxError};
use crate::gateway::{AgentAction, LLMGateway, ProposalContext};
use crate::sandbox::{SandboxExecutor, SandboxResult};
use crate::snapshot::WorkspaceSnapshot;

/// Clock that records requested sleeps and returns immediately, so
/// backoff behavior is assertable without waiting.
#[derive(Default)]
pub struct MockClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Gateway that replays a fixed sequence of actions. Running out of
/// script is a gateway error, which catches tests that call the model
/// more often than they expect.
#[derive(Default)]
pub struct ScriptedGateway {
    actions: Mutex<VecDeque<AgentAction>>,
}

impl ScriptedGateway {
    pub fn with_actions(actions: Vec<AgentAction>) -> Self {
        Self {
            actions: Mutex::new(actions.into()),
        }
    }
}

#[async_trait]
impl LLMGateway for ScriptedGateway {
    async fn propose(&self, _context: &ProposalContext) -> Result<AgentAction, AgentError> {
        self.actions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Gateway("scripted gateway exhausted".to_string()))
    }
}

/// Sandbox that replays a fixed sequence of verdicts. `Ok(true)` passes,
/// `Ok(false)` fails with canned logs, `Err(reason)` simulates a backend
/// fault (which the caller treats as transient).
#[derive(Default)]
pub struct ScriptedSandbox {
    verdicts: Mutex<VecDeque<Result<bool, String>>>,
}

impl ScriptedSandbox {
    pub fn with_verdicts(verdicts: Vec<Result<bool, String>>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
        }
    }

    pub fn passing(count: usize) -> Self {
        Self::with_verdicts(vec![Ok(true); count])
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedSandbox {
    async fn validate(
        &self,
        _snapshot: &WorkspaceSnapshot,
        _commands: &[String],
        _timeout: Duration,
    ) -> Result<SandboxResult, SandboxError> {
        match self.verdicts.lock().unwrap().pop_front() {
            Some(Ok(true)) => Ok(SandboxResult {
                passed: true,
                logs: "all tests passed\n".to_string(),
                exit_code: Some(0),
                duration_exceeded: false,
            }),
            Some(Ok(false)) => Ok(SandboxResult {
                passed: false,
                logs: "test failed: expected 2, got 3\n".to_string(),
                exit_code: Some(1),
                duration_exceeded: false,
            }),
            Some(Err(reason)) => Err(SandboxError::Provision(reason)),
            None => Err(SandboxError::Provision(
                "scripted sandbox exhausted".to_string(),
            )),
        }
    }

    async fn health(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}
