//! Session orchestration state machine.
//!
//! A session is reconstructed from scratch on every request: the caller
//! supplies the full conversation, the file set, and the opaque state
//! blob returned by the previous response. The machine loops model
//! proposals and sandbox validations until the application is accepted,
//! the user must be asked for clarification, or the retry budget runs
//! out. With deterministic collaborators the same inputs always produce
//! the same outcomes, which is what makes suspension and resumption
//! safe across stateless requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use appforge_protocol::{
    AgentMessage, AgentRequest, ConversationMessage, DiffStatEntry, EventStatus, MessageBlock,
    MessageKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, RetryPolicy};
use crate::diff::{DiffEngine, WorkspaceDiff};
use crate::errors::AgentError;
use crate::gateway::{AgentAction, LLMGateway, ProposalContext};
use crate::sandbox::{retry_with_backoff, SandboxExecutor, SandboxPool};
use crate::snapshot::WorkspaceSnapshot;
use crate::template::TemplateProvider;

/// Per-session tuning, overridable via the request `settings` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Maximum number of autonomous StageResult steps per session.
    pub iteration_cap: u32,
    /// Consecutive validation failures before escalating to a runtime
    /// error.
    pub max_validation_failures: u32,
    /// Combined build+test timeout in the sandbox, seconds.
    pub sandbox_timeout_secs: u64,
    /// Model gateway call timeout, seconds.
    pub model_timeout_secs: u64,
    /// Heartbeat interval for the event stream, seconds.
    pub heartbeat_interval_secs: u64,
    /// Container image used for validation runs.
    pub sandbox_image: String,
    /// Build and test commands, run in sequence.
    pub validation_commands: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            iteration_cap: 10,
            max_validation_failures: 3,
            sandbox_timeout_secs: 300,
            model_timeout_secs: 120,
            heartbeat_interval_secs: 15,
            sandbox_image: "oven/bun:1.2.5-alpine".to_string(),
            validation_commands: vec!["bun install".to_string(), "bun test".to_string()],
        }
    }
}

impl SessionSettings {
    /// Parse overrides from the request settings object; absent fields
    /// keep their defaults.
    pub fn from_value(value: Option<&Value>) -> Result<Self, AgentError> {
        match value {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| AgentError::Validation(format!("invalid settings: {}", e))),
            None => Ok(Self::default()),
        }
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Initializing,
    Planning,
    Generating,
    Validating,
    AwaitingFeedback,
    Completed,
    Failed,
}

impl SessionPhase {
    /// Phases at which the session is at rest between requests.
    pub fn is_at_rest(&self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingFeedback | SessionPhase::Completed | SessionPhase::Failed
        )
    }
}

/// Diff metadata of the most recent step, kept so terminal events (and
/// idempotent replays) can carry it without recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDiff {
    pub unified_diff: String,
    pub hash: String,
    pub stats: Vec<DiffStatEntry>,
}

impl From<WorkspaceDiff> for LastDiff {
    fn from(diff: WorkspaceDiff) -> Self {
        Self {
            unified_diff: diff.unified_diff,
            hash: diff.hash,
            stats: diff.stats,
        }
    }
}

/// The externalized session state. Serialized into the `agentState`
/// field of every substantive event and restored verbatim on the next
/// request; the service keeps no copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub application_id: String,
    pub phase: SessionPhase,
    pub files: WorkspaceSnapshot,
    /// StageResult steps emitted so far.
    pub stage_results: u32,
    /// Consecutive failed validations.
    pub validation_failures: u32,
    /// Logs of the last failed validation, fed to the next proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_diff: Option<LastDiff>,
    /// Last terminal/suspend message, replayed when the session is
    /// resumed at rest without new user input. Stored without its own
    /// `agent_state` to keep the blob from nesting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<AgentMessage>,
}

impl SessionState {
    fn fresh(application_id: String, files: WorkspaceSnapshot) -> Self {
        Self {
            application_id,
            phase: SessionPhase::Planning,
            files,
            stage_results: 0,
            validation_failures: 0,
            validation_feedback: None,
            app_name: None,
            commit_message: None,
            last_diff: None,
            last_outcome: None,
        }
    }
}

/// External collaborators and shared resources a session runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn LLMGateway>,
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub templates: Arc<dyn TemplateProvider>,
    pub pool: SandboxPool,
    pub clock: Arc<dyn Clock>,
    pub retry_policy: RetryPolicy,
}

/// Outcome of one state-machine step, ready to be streamed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: EventStatus,
    pub message: AgentMessage,
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        self.status == EventStatus::Idle
    }
}

/// One resumable instance of the code-generation loop.
pub struct Session {
    state: SessionState,
    trace_id: String,
    messages: Vec<ConversationMessage>,
    settings: SessionSettings,
    collaborators: Collaborators,
}

impl Session {
    /// Reconstruct a session from a request. Fails with a validation
    /// error (HTTP 400, before streaming) on malformed input.
    pub async fn resume(
        request: &AgentRequest,
        collaborators: Collaborators,
    ) -> Result<Session, AgentError> {
        if request.application_id.trim().is_empty() {
            return Err(AgentError::Validation("applicationId is required".to_string()));
        }
        if request.trace_id.trim().is_empty() {
            return Err(AgentError::Validation("traceId is required".to_string()));
        }
        if request.all_messages.is_empty() {
            return Err(AgentError::Validation(
                "allMessages must not be empty".to_string(),
            ));
        }

        let settings = SessionSettings::from_value(request.settings.as_ref())?;
        let has_new_user_input = request.trailing_user_message().is_some();

        let state = match &request.agent_state {
            Some(blob) => {
                let mut state: SessionState = serde_json::from_value(blob.clone())
                    .map_err(|e| AgentError::Serialization(format!("invalid agentState: {}", e)))?;
                if state.application_id != request.application_id {
                    return Err(AgentError::Validation(
                        "agentState belongs to a different applicationId".to_string(),
                    ));
                }
                if state.phase.is_at_rest() && has_new_user_input {
                    // New user input re-enters the loop: feedback after a
                    // clarification, or a revision of a finished app.
                    state.phase = SessionPhase::Planning;
                    state.stage_results = 0;
                    state.validation_failures = 0;
                    state.validation_feedback = None;
                    state.last_outcome = None;
                } else if !state.phase.is_at_rest() {
                    // A request died mid-step; restart the step from the
                    // last durable snapshot.
                    state.phase = SessionPhase::Planning;
                }
                state
            }
            None => {
                let files = match &request.all_files {
                    Some(files) if !files.is_empty() => WorkspaceSnapshot::from_entries(files),
                    _ => {
                        collaborators
                            .templates
                            .load(request.template_id.as_deref())
                            .await?
                    }
                };
                log::info!(
                    "Starting fresh session {} with {} workspace files",
                    request.application_id,
                    files.len()
                );
                SessionState::fresh(request.application_id.clone(), files)
            }
        };

        Ok(Session {
            state,
            trace_id: request.trace_id.clone(),
            messages: request.all_messages.clone(),
            settings,
            collaborators,
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// Execute one step. Infallible by design: every fault is translated
    /// into a well-formed outcome so a stream can never terminate in an
    /// ambiguous state.
    pub async fn step(&mut self) -> StepOutcome {
        match self.try_step().await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("Session step failed: {}", err);
                self.fail(format!("step failed: {}", err))
            }
        }
    }

    async fn try_step(&mut self) -> Result<StepOutcome, AgentError> {
        if self.state.phase.is_at_rest() {
            return Ok(self.replay_at_rest());
        }

        self.state.phase = SessionPhase::Planning;
        let context = ProposalContext::new(self.messages.clone(), &self.state.files)
            .with_validation_feedback(self.state.validation_feedback.clone());

        let action = {
            let context = &context;
            let gateway = self.collaborators.gateway.clone();
            let model_timeout = self.settings.model_timeout();
            retry_with_backoff(
                self.collaborators.clock.as_ref(),
                &self.collaborators.retry_policy,
                move || {
                    let gateway = gateway.clone();
                    async move {
                        match tokio::time::timeout(model_timeout, gateway.propose(context)).await {
                            Ok(result) => result,
                            Err(_) => Err(AgentError::TransientInfra(format!(
                                "model call did not complete within {}s",
                                model_timeout.as_secs()
                            ))),
                        }
                    }
                },
            )
            .await?
        };

        match action {
            AgentAction::Clarify { question } => {
                log::info!("Model requested clarification");
                self.state.phase = SessionPhase::AwaitingFeedback;
                let mut message = AgentMessage::of_kind(MessageKind::RefinementRequest);
                message.content = Some(question.clone());
                message.messages = Some(vec![MessageBlock::assistant(question)]);
                Ok(self.finish(message))
            }
            AgentAction::Fail { reason } => Ok(self.fail(reason)),
            AgentAction::Done { summary } => Ok(self.complete(summary)),
            AgentAction::Edit {
                files,
                app_name,
                commit_message,
                summary,
            } => {
                self.apply_edit(files, app_name, commit_message, summary)
                    .await
            }
        }
    }

    async fn apply_edit(
        &mut self,
        edits: BTreeMap<String, Option<String>>,
        app_name: Option<String>,
        commit_message: Option<String>,
        summary: Option<String>,
    ) -> Result<StepOutcome, AgentError> {
        self.state.phase = SessionPhase::Generating;
        if let Some(name) = app_name {
            self.state.app_name = Some(name);
        }
        if let Some(msg) = commit_message {
            self.state.commit_message = Some(msg);
        }

        let next = self.state.files.apply(&edits);
        let diff = DiffEngine::diff(&self.state.files, &next);
        log::info!(
            "Edit touches {} files (+{} -{})",
            diff.stats.len(),
            diff.stats.iter().map(|s| s.insertions).sum::<usize>(),
            diff.stats.iter().map(|s| s.deletions).sum::<usize>(),
        );

        self.state.phase = SessionPhase::Validating;
        let result = {
            // The permit is held for the whole validation, including
            // internal retries, and released on every exit path.
            let _permit = self.collaborators.pool.acquire().await?;
            let snapshot = &next;
            let commands = self.settings.validation_commands.clone();
            let timeout = self.settings.sandbox_timeout();
            let sandbox = self.collaborators.sandbox.clone();
            retry_with_backoff(
                self.collaborators.clock.as_ref(),
                &self.collaborators.retry_policy,
                move || {
                    let sandbox = sandbox.clone();
                    let commands = commands.clone();
                    async move {
                        sandbox
                            .validate(snapshot, &commands, timeout)
                            .await
                            .map_err(AgentError::from)
                    }
                },
            )
            .await?
        };

        self.state.files = next;
        self.state.last_diff = Some(LastDiff::from(diff));

        if result.passed {
            log::info!("Validation passed; session complete");
            self.state.validation_feedback = None;
            Ok(self.complete(summary))
        } else {
            self.state.validation_failures += 1;
            let failure = if result.duration_exceeded {
                format!(
                    "Validation timed out after {}s.\n{}",
                    self.settings.sandbox_timeout_secs, result.logs
                )
            } else {
                format!(
                    "Validation failed with exit code {:?}.\n{}",
                    result.exit_code, result.logs
                )
            };
            log::warn!(
                "Validation failure {}/{}",
                self.state.validation_failures,
                self.settings.max_validation_failures
            );

            if self.state.validation_failures >= self.settings.max_validation_failures {
                return Ok(self.fail(format!(
                    "validation failed {} consecutive times; giving up.\n{}",
                    self.state.validation_failures, failure
                )));
            }
            if self.state.stage_results >= self.settings.iteration_cap {
                return Ok(self.fail(format!(
                    "iteration cap of {} autonomous steps exhausted",
                    self.settings.iteration_cap
                )));
            }

            self.state.stage_results += 1;
            self.state.validation_feedback = Some(result.logs);

            let mut message = AgentMessage::of_kind(MessageKind::StageResult);
            let text = summary.unwrap_or_else(|| "Applied edit; validation failed, retrying.".to_string());
            message.content = Some(failure.clone());
            message.messages = Some(vec![MessageBlock::assistant(format!("{}\n{}", text, failure))]);
            self.attach_diff(&mut message);
            message.agent_state = Some(self.state_blob());
            Ok(StepOutcome {
                status: EventStatus::Running,
                message,
            })
        }
    }

    /// Terminal accept: the ReviewResult always carries the diff of the
    /// session's last step, the app name, and the commit message.
    fn complete(&mut self, summary: Option<String>) -> StepOutcome {
        self.state.phase = SessionPhase::Completed;
        if self.state.last_diff.is_none() {
            // Accepting without any edit this request: an empty diff is
            // still a valid, hashable diff.
            self.state.last_diff = Some(LastDiff::from(DiffEngine::diff(
                &self.state.files,
                &self.state.files,
            )));
        }
        let text = summary.unwrap_or_else(|| "Application accepted.".to_string());
        let mut message = AgentMessage::of_kind(MessageKind::ReviewResult);
        message.content = Some(text.clone());
        message.messages = Some(vec![MessageBlock::assistant(text)]);
        self.attach_diff(&mut message);
        self.finish(message)
    }

    fn fail(&mut self, reason: String) -> StepOutcome {
        self.state.phase = SessionPhase::Failed;
        let mut message = AgentMessage::of_kind(MessageKind::RuntimeError);
        message.content = Some(reason.clone());
        message.messages = Some(vec![MessageBlock::assistant(reason)]);
        self.finish(message)
    }

    /// Re-emit the stored outcome when resumed at rest with no new user
    /// input, so identical requests reproduce identical results.
    fn replay_at_rest(&mut self) -> StepOutcome {
        let message = self.state.last_outcome.clone().unwrap_or_else(|| {
            let kind = match self.state.phase {
                SessionPhase::Completed => MessageKind::ReviewResult,
                SessionPhase::Failed => MessageKind::RuntimeError,
                _ => MessageKind::RefinementRequest,
            };
            AgentMessage::of_kind(kind)
        });
        self.finish(message)
    }

    fn attach_diff(&self, message: &mut AgentMessage) {
        if let Some(diff) = &self.state.last_diff {
            message.unified_diff = Some(diff.unified_diff.clone());
            message.complete_diff_hash = Some(diff.hash.clone());
            message.diff_stat = Some(diff.stats.clone());
        }
        message.app_name = self.state.app_name.clone();
        message.commit_message = self.state.commit_message.clone();
    }

    /// Seal a terminal/suspend outcome: remember it for replay and
    /// attach the state blob the caller needs to resume.
    fn finish(&mut self, mut message: AgentMessage) -> StepOutcome {
        self.state.last_outcome = Some(message.clone());
        message.agent_state = Some(self.state_blob());
        StepOutcome {
            status: EventStatus::Idle,
            message,
        }
    }

    fn state_blob(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }
}
