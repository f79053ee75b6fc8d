//! Streamed event envelope.

use serde::{Deserialize, Serialize};

use crate::messages::{AgentMessage, MessageKind};

/// Derived stream status: whether another autonomous step will occur
/// without new external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// The agent will take another step on its own.
    Running,
    /// The session is suspended or terminated; no further steps occur
    /// until the client sends a new request.
    Idle,
}

/// One externally visible event in the session stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSseEvent {
    /// Derived running/idle status.
    pub status: EventStatus,
    /// Trace identifier echoed from the request, for correlation.
    pub trace_id: String,
    /// The step payload.
    pub message: AgentMessage,
}

impl AgentSseEvent {
    pub fn new(status: EventStatus, trace_id: impl Into<String>, message: AgentMessage) -> Self {
        Self {
            status,
            trace_id: trace_id.into(),
            message,
        }
    }

    /// Heartbeat event. Always `running`: a heartbeat is only emitted
    /// while a step is still in flight.
    pub fn keep_alive(trace_id: impl Into<String>) -> Self {
        Self::new(
            EventStatus::Running,
            trace_id,
            AgentMessage::keep_alive(),
        )
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.message.kind.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EventStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(serde_json::to_string(&EventStatus::Idle).unwrap(), "\"idle\"");
    }

    #[test]
    fn keep_alive_is_running_and_payload_free() {
        let event = AgentSseEvent::keep_alive("trace-1");
        assert_eq!(event.status, EventStatus::Running);
        assert_eq!(event.message.kind, MessageKind::KeepAlive);
        assert!(event.message.agent_state.is_none());
        assert!(!event.is_terminal());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["traceId"], "trace-1");
        assert_eq!(json["message"]["kind"], "KEEP_ALIVE");
    }
}
