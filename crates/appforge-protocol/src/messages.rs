//! Conversation messages and per-step payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an agent event, driving the client's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// An autonomous step completed; another step follows without input.
    StageResult,
    /// The agent needs clarification; the session suspends until the
    /// client supplies a new user message.
    RefinementRequest,
    /// The session terminated with an unrecoverable error.
    RuntimeError,
    /// The generated application was accepted; the session is complete.
    ReviewResult,
    /// Heartbeat with no semantic payload. Must not affect session state.
    KeepAlive,
}

impl MessageKind {
    /// Whether this kind ends or suspends the session (stream goes idle).
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            MessageKind::RefinementRequest | MessageKind::RuntimeError | MessageKind::ReviewResult
        )
    }
}

/// A single file in a workspace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Workspace-relative path.
    pub path: String,
    /// Full file content.
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Line-level change statistics for one file between two consecutive
/// workspace snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStatEntry {
    /// Workspace-relative path of the changed file.
    pub path: String,
    /// Number of inserted lines.
    pub insertions: usize,
    /// Number of deleted lines.
    pub deletions: usize,
}

/// One displayable block inside an agent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBlock {
    /// Role of the block author; always "assistant" for agent output.
    pub role: String,
    /// Text content of the block.
    pub content: String,
    /// When the block was produced (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageBlock {
    /// Create an assistant block stamped with the current time.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Payload of one agent step, streamed to the client and echoed back in
/// the conversation history on subsequent requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Step classification.
    pub kind: MessageKind,
    /// Free-form text summary of the step (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Structured assistant blocks (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageBlock>>,
    /// Opaque serialized session state; the caller must return it
    /// verbatim to resume the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<Value>,
    /// Unified diff between the previous and current workspace snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
    /// Deterministic hash of the full diff text, for staleness checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_diff_hash: Option<String>,
    /// Per-file change statistics for this step only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stat: Option<Vec<DiffStatEntry>>,
    /// Generated application name, once the model has chosen one.
    #[serde(rename = "app_name", default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Suggested commit message for the current diff.
    #[serde(
        rename = "commit_message",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commit_message: Option<String>,
}

impl AgentMessage {
    /// A bare message of the given kind with all payload fields empty.
    pub fn of_kind(kind: MessageKind) -> Self {
        Self {
            kind,
            content: None,
            messages: None,
            agent_state: None,
            unified_diff: None,
            complete_diff_hash: None,
            diff_stat: None,
            app_name: None,
            commit_message: None,
        }
    }

    /// The heartbeat message. Carries no payload by definition.
    pub fn keep_alive() -> Self {
        Self::of_kind(MessageKind::KeepAlive)
    }
}

/// One entry in the conversation history, tagged by author role.
/// Insertion order is the conversation order and is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationMessage {
    /// A message authored by the user.
    User {
        /// The user's request or feedback.
        content: String,
    },
    /// A message previously streamed by the agent, echoed back verbatim.
    Assistant {
        /// The original step payload.
        #[serde(flatten)]
        message: AgentMessage,
    },
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationMessage::User {
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, ConversationMessage::User { .. })
    }

    /// Text content, if the message carries any.
    pub fn content(&self) -> Option<&str> {
        match self {
            ConversationMessage::User { content } => Some(content),
            ConversationMessage::Assistant { message } => message.content.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&MessageKind::RefinementRequest).unwrap(),
            "\"REFINEMENT_REQUEST\""
        );
        assert_eq!(
            serde_json::to_string(&MessageKind::StageResult).unwrap(),
            "\"STAGE_RESULT\""
        );
    }

    #[test]
    fn idle_kinds() {
        assert!(MessageKind::ReviewResult.is_idle());
        assert!(MessageKind::RuntimeError.is_idle());
        assert!(MessageKind::RefinementRequest.is_idle());
        assert!(!MessageKind::StageResult.is_idle());
        assert!(!MessageKind::KeepAlive.is_idle());
    }

    #[test]
    fn agent_message_uses_legacy_snake_case_fields() {
        let mut msg = AgentMessage::of_kind(MessageKind::ReviewResult);
        msg.app_name = Some("todo-list".to_string());
        msg.commit_message = Some("Initial scaffold".to_string());
        msg.complete_diff_hash = Some("abc".to_string());

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["app_name"], "todo-list");
        assert_eq!(json["commit_message"], "Initial scaffold");
        assert_eq!(json["completeDiffHash"], "abc");
    }

    #[test]
    fn conversation_message_round_trips_by_role() {
        let user = ConversationMessage::user("build a todo app");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "user");

        let agent = ConversationMessage::Assistant {
            message: AgentMessage::of_kind(MessageKind::StageResult),
        };
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["kind"], "STAGE_RESULT");

        let back: ConversationMessage = serde_json::from_value(json).unwrap();
        assert!(!back.is_user());
    }
}
