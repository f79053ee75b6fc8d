//! Error taxonomy for the session orchestration core.
//!
//! Every fault raised while executing a step is translated into one of
//! these categories at the state-machine boundary: malformed requests are
//! rejected before streaming starts, transient infrastructure failures
//! are retried internally, and everything else terminates the stream
//! with a well-formed runtime-error event.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// Malformed request; maps to HTTP 400 before streaming begins.
    #[error("validation error: {0}")]
    Validation(String),
    /// Sandbox backend or model gateway temporarily unavailable; retried
    /// internally with bounded backoff, never surfaced directly.
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),
    /// Retry/iteration budget exhausted or the model explicitly reported
    /// failure; ends the session as a runtime error.
    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),
    /// The model gateway returned an unusable response.
    #[error("model gateway error: {0}")]
    Gateway(String),
    /// The scaffold template could not be loaded.
    #[error("template error: {0}")]
    Template(String),
    /// Session state blob could not be serialized or restored.
    #[error("state serialization error: {0}")]
    Serialization(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        // Connection-level failures are retryable; anything else is a
        // gateway fault.
        if err.is_connect() || err.is_timeout() {
            AgentError::TransientInfra(err.to_string())
        } else {
            AgentError::Gateway(err.to_string())
        }
    }
}

impl AgentError {
    /// Whether the error should be retried with backoff inside the
    /// current step.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::TransientInfra(_))
    }
}

/// Faults specific to the Docker sandbox backend. These are all
/// infrastructure failures: a build or test script failing inside the
/// container is a normal `SandboxResult`, not an error.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("docker backend error: {0}")]
    Backend(#[from] bollard::errors::Error),
    #[error("I/O error while materializing sandbox workspace: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 decoding error in sandbox output: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("could not provision sandbox workspace: {0}")]
    Provision(String),
    #[error("sandbox pool is shut down")]
    PoolClosed,
}

impl From<SandboxError> for AgentError {
    fn from(err: SandboxError) -> Self {
        AgentError::TransientInfra(err.to_string())
    }
}
