//! Language-model gateway.
//!
//! The model is an external collaborator: given the conversation and the
//! current workspace, it returns exactly one classified action. Responses
//! are parsed into the closed [`AgentAction`] set right at this boundary
//! so the state machine never branches on loose payloads.

use std::collections::BTreeMap;

use appforge_protocol::ConversationMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::snapshot::WorkspaceSnapshot;

/// Everything the model sees for one step.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalContext {
    /// Full conversation history, oldest first.
    pub messages: Vec<ConversationMessage>,
    /// Current workspace file set.
    pub files: BTreeMap<String, String>,
    /// Logs from the previous failed validation, if any. Feeding these
    /// back is what turns a failing build into a retry instead of an
    /// abort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_feedback: Option<String>,
}

impl ProposalContext {
    pub fn new(messages: Vec<ConversationMessage>, snapshot: &WorkspaceSnapshot) -> Self {
        Self {
            messages,
            files: snapshot
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            validation_feedback: None,
        }
    }

    pub fn with_validation_feedback(mut self, feedback: Option<String>) -> Self {
        self.validation_feedback = feedback;
        self
    }
}

/// The closed set of actions a model response can classify into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Propose workspace edits. `None` content deletes a file.
    Edit {
        files: BTreeMap<String, Option<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// Ask the user for clarification; suspends the session.
    Clarify { question: String },
    /// Declare the application complete as-is.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// Report an unrecoverable failure.
    Fail { reason: String },
}

#[async_trait]
pub trait LLMGateway: Send + Sync {
    /// Produce the next classified action for the session. Implementors
    /// must be cancel-safe: dropping the returned future abandons the
    /// call.
    async fn propose(&self, context: &ProposalContext) -> Result<AgentAction, AgentError>;
}

/// Gateway over a remote model endpoint speaking JSON.
pub struct HttpLLMGateway {
    endpoint_url: String,
    client: Client,
    request_timeout: std::time::Duration,
}

impl HttpLLMGateway {
    pub fn new(endpoint_url: String, request_timeout: std::time::Duration) -> Self {
        Self {
            endpoint_url,
            client: Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl LLMGateway for HttpLLMGateway {
    async fn propose(&self, context: &ProposalContext) -> Result<AgentAction, AgentError> {
        let request_url = format!("{}/v1/propose", self.endpoint_url);
        log::debug!(
            "HttpLLMGateway sending {} messages, {} files to {}",
            context.messages.len(),
            context.files.len(),
            request_url
        );

        let response = self
            .client
            .post(&request_url)
            .timeout(self.request_timeout)
            .json(context)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            let err_msg = format!("model endpoint returned {}: {}", status, error_text);
            log::error!("{}", err_msg);
            return if status.is_server_error() {
                Err(AgentError::TransientInfra(err_msg))
            } else {
                Err(AgentError::Gateway(err_msg))
            };
        }

        let payload: serde_json::Value = response.json().await?;
        parse_action(payload)
    }
}

/// Parse a raw model payload into the closed action set. Anything that
/// does not classify is a gateway fault, not a silent passthrough.
pub fn parse_action(payload: serde_json::Value) -> Result<AgentAction, AgentError> {
    serde_json::from_value(payload)
        .map_err(|e| AgentError::Gateway(format!("unclassifiable model response: {}", e)))
}
