//! Inbound request payload for `POST /message`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{ConversationMessage, FileEntry};

/// A full session request. Every request carries the complete
/// conversation and file set; the service reconstructs the session from
/// `agent_state` and holds nothing between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Full conversation history, oldest first.
    pub all_messages: Vec<ConversationMessage>,
    /// Current workspace file set (optional; empty means "seed from the
    /// template").
    #[serde(default)]
    pub all_files: Option<Vec<FileEntry>>,
    /// Identifier of the application being generated.
    pub application_id: String,
    /// Trace identifier echoed on every streamed event.
    pub trace_id: String,
    /// Scaffold template to seed a fresh workspace from (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Opaque state blob returned by a previous response (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<Value>,
    /// Per-session setting overrides (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl AgentRequest {
    /// The most recent user message, if the conversation ends with one.
    /// A trailing agent message means the request resumes without new
    /// user input.
    pub fn trailing_user_message(&self) -> Option<&str> {
        match self.all_messages.last() {
            Some(msg) if msg.is_user() => msg.content(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_request() {
        let json = serde_json::json!({
            "allMessages": [{"role": "user", "content": "build a todo list app"}],
            "allFiles": [],
            "applicationId": "app-1",
            "traceId": "trace-1",
            "templateId": "trpc",
        });
        let request: AgentRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.application_id, "app-1");
        assert_eq!(request.template_id.as_deref(), Some("trpc"));
        assert_eq!(
            request.trailing_user_message(),
            Some("build a todo list app")
        );
        assert!(request.agent_state.is_none());
    }

    #[test]
    fn trailing_agent_message_means_no_new_input() {
        use crate::messages::{AgentMessage, MessageKind};

        let request = AgentRequest {
            all_messages: vec![
                ConversationMessage::user("build it"),
                ConversationMessage::Assistant {
                    message: AgentMessage::of_kind(MessageKind::ReviewResult),
                },
            ],
            all_files: None,
            application_id: "app-1".to_string(),
            trace_id: "trace-1".to_string(),
            template_id: None,
            agent_state: None,
            settings: None,
        };
        assert!(request.trailing_user_message().is_none());
    }
}
