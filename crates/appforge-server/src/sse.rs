//! Server-Sent Events (SSE) transport for session event streams.

use axum::response::sse::{Event as AxumEvent, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use appforge_protocol::{AgentSseEvent, MessageKind};
use futures_util::Stream;
use pin_project_lite::pin_project;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{Result, ServerError};

/// An SSE event ready to be written to a client.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Event type (optional)
    pub event_type: Option<String>,
    /// Event data
    pub data: String,
    /// Event ID (optional)
    pub id: Option<String>,
}

impl SseEvent {
    /// Create a new SSE event with just data.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
            id: None,
        }
    }

    /// Create a new SSE event with event type and data.
    pub fn with_type(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            data: data.into(),
            id: None,
        }
    }

    /// Set the event ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize a session event into its wire form. The SSE event type
    /// mirrors the message kind so clients can dispatch without parsing
    /// the payload.
    pub fn from_session_event(event: &AgentSseEvent) -> Result<Self> {
        let data = serde_json::to_string(event).map_err(ServerError::Json)?;

        let event_type = match event.message.kind {
            MessageKind::StageResult => "STAGE_RESULT",
            MessageKind::RefinementRequest => "REFINEMENT_REQUEST",
            MessageKind::RuntimeError => "RUNTIME_ERROR",
            MessageKind::ReviewResult => "REVIEW_RESULT",
            MessageKind::KeepAlive => "KEEP_ALIVE",
        };

        Ok(Self::with_type(event_type, data))
    }
}

impl From<SseEvent> for AxumEvent {
    fn from(event: SseEvent) -> Self {
        let mut axum_event = AxumEvent::default().data(event.data);

        if let Some(event_type) = event.event_type {
            axum_event = axum_event.event(event_type);
        }

        if let Some(id) = event.id {
            axum_event = axum_event.id(id);
        }

        axum_event
    }
}

pin_project! {
    /// A stream wrapper that converts session events to SSE events.
    pub struct SseStream<S> {
        #[pin]
        inner: S,
    }
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: stream }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = AgentSseEvent>,
{
    type Item = std::result::Result<AxumEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(event)) => match SseEvent::from_session_event(&event) {
                Ok(sse_event) => Poll::Ready(Some(Ok(sse_event.into()))),
                Err(e) => {
                    log::error!("Failed to convert session event to SSE: {}", e);
                    let error_event = SseEvent::with_type(
                        "error",
                        format!(r#"{{"error": "Failed to serialize event: {}"}}"#, e),
                    );
                    Poll::Ready(Some(Ok(error_event.into())))
                }
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create an SSE response from a stream of session events. The comment
/// keep-alive here is transport-level padding only; semantic heartbeats
/// are KEEP_ALIVE events injected upstream.
pub fn create_sse_response<S>(stream: S, keepalive_interval: Duration) -> Response
where
    S: Stream<Item = AgentSseEvent> + Send + 'static,
{
    let sse_stream = SseStream::new(stream);

    Sse::new(sse_stream)
        .keep_alive(
            KeepAlive::new()
                .interval(keepalive_interval)
                .text("keep-alive"),
        )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_protocol::{AgentMessage, EventStatus};
    use futures_util::{stream, StreamExt as _};

    #[test]
    fn sse_event_creation() {
        let event = SseEvent::new("test data");
        assert_eq!(event.data, "test data");
        assert!(event.event_type.is_none());
        assert!(event.id.is_none());
    }

    #[test]
    fn event_type_mirrors_message_kind() {
        let event = AgentSseEvent::new(
            EventStatus::Idle,
            "trace-1",
            AgentMessage::of_kind(MessageKind::ReviewResult),
        );
        let sse_event = SseEvent::from_session_event(&event).unwrap();
        assert_eq!(sse_event.event_type, Some("REVIEW_RESULT".to_string()));
        assert!(sse_event.data.contains("trace-1"));
        assert!(sse_event.data.contains("\"status\":\"idle\""));
    }

    #[tokio::test]
    async fn stream_converts_events_in_order() {
        let events = vec![
            AgentSseEvent::new(
                EventStatus::Running,
                "trace-1",
                AgentMessage::of_kind(MessageKind::StageResult),
            ),
            AgentSseEvent::keep_alive("trace-1"),
        ];

        let mut sse_stream = SseStream::new(stream::iter(events));
        let first = sse_stream.next().await.unwrap().unwrap();
        let second = sse_stream.next().await.unwrap().unwrap();
        assert!(format!("{:?}", first).contains("STAGE_RESULT"));
        assert!(format!("{:?}", second).contains("KEEP_ALIVE"));
    }
}
