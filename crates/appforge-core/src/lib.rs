//! Core orchestration engine for resumable code-generation sessions.
//!
//! The engine reconstructs a [`session::Session`] from each request,
//! drives the propose/apply/validate loop against an LLM gateway and a
//! sandboxed executor, and externalizes all state into the outgoing
//! events so the service itself stays stateless.

pub mod clock;
pub mod diff;
pub mod errors;
pub mod gateway;
pub mod sandbox;
pub mod session;
pub mod snapshot;
pub mod template;

#[cfg(test)]
pub mod test_utils;

pub use clock::{Clock, RetryPolicy, SystemClock};
pub use diff::{DiffEngine, WorkspaceDiff};
pub use errors::{AgentError, SandboxError};
pub use gateway::{AgentAction, HttpLLMGateway, LLMGateway, ProposalContext};
pub use sandbox::{DockerSandbox, SandboxExecutor, SandboxPool, SandboxResult};
pub use session::{
    Collaborators, Session, SessionPhase, SessionSettings, SessionState, StepOutcome,
};
pub use snapshot::WorkspaceSnapshot;
pub use template::{DirTemplateProvider, StaticTemplateProvider, TemplateProvider};
