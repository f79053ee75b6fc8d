//! Session event streams and heartbeat injection.
//!
//! A session stream yields one envelope per state-machine step until an
//! idle event ends it. The heartbeat wrapper watches the gap between
//! substantive events and injects KEEP_ALIVE envelopes while a step is
//! still in flight, so proxies never see a silent connection.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use appforge_core::Session;
use appforge_protocol::{AgentMessage, AgentSseEvent, EventStatus, MessageBlock, MessageKind};
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

/// Drive a session to rest, yielding one event per step. The final
/// event always has idle status; step-level faults arrive as
/// RUNTIME_ERROR events rather than a broken stream.
pub fn session_event_stream(mut session: Session) -> impl Stream<Item = AgentSseEvent> {
    let trace_id = session.trace_id().to_string();
    async_stream::stream! {
        loop {
            let outcome = session.step().await;
            let idle = outcome.is_idle();
            yield AgentSseEvent::new(outcome.status, trace_id.clone(), outcome.message);
            if idle {
                break;
            }
        }
    }
}

pin_project! {
    /// Injects a KEEP_ALIVE event whenever the inner stream stays
    /// pending longer than the interval. The timer resets on every
    /// substantive event, so heartbeats measure silence, not wall time.
    pub struct HeartbeatStream<S> {
        #[pin]
        inner: S,
        #[pin]
        sleep: Sleep,
        interval: Duration,
        trace_id: String,
    }
}

impl<S> HeartbeatStream<S> {
    pub fn new(inner: S, interval: Duration, trace_id: String) -> Self {
        Self {
            inner,
            sleep: tokio::time::sleep(interval),
            interval,
            trace_id,
        }
    }
}

impl<S> Stream for HeartbeatStream<S>
where
    S: Stream<Item = AgentSseEvent>,
{
    type Item = AgentSseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(event)) => {
                this.sleep.as_mut().reset(Instant::now() + *this.interval);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match this.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.sleep.as_mut().reset(Instant::now() + *this.interval);
                    Poll::Ready(Some(AgentSseEvent::keep_alive(this.trace_id.clone())))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

pin_project! {
    /// Bounds the total wall-clock duration of a session stream. When
    /// the deadline passes, the inner stream is dropped, which cancels
    /// any in-flight model call or sandbox run, and one terminal
    /// RUNTIME_ERROR event is emitted before the stream ends.
    pub struct DeadlineStream<S> {
        #[pin]
        inner: Option<S>,
        #[pin]
        deadline: Sleep,
        limit: Duration,
        trace_id: String,
    }
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S, limit: Duration, trace_id: String) -> Self {
        Self {
            inner: Some(inner),
            deadline: tokio::time::sleep(limit),
            limit,
            trace_id,
        }
    }
}

impl<S> Stream for DeadlineStream<S>
where
    S: Stream<Item = AgentSseEvent>,
{
    type Item = AgentSseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        let Some(inner) = this.inner.as_mut().as_pin_mut() else {
            return Poll::Ready(None);
        };

        if this.deadline.as_mut().poll(cx).is_ready() {
            log::warn!(
                "Session stream {} exceeded the {}s request time limit",
                this.trace_id,
                this.limit.as_secs()
            );
            this.inner.set(None);
            let reason = format!(
                "session exceeded the {}s request time limit",
                this.limit.as_secs()
            );
            let mut message = AgentMessage::of_kind(MessageKind::RuntimeError);
            message.content = Some(reason.clone());
            message.messages = Some(vec![MessageBlock::assistant(reason)]);
            return Poll::Ready(Some(AgentSseEvent::new(
                EventStatus::Idle,
                this.trace_id.clone(),
                message,
            )));
        }

        match inner.poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                this.inner.set(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_protocol::{AgentMessage, EventStatus, MessageKind};
    use futures_util::{stream, StreamExt};

    fn stage_event() -> AgentSseEvent {
        AgentSseEvent::new(
            EventStatus::Running,
            "trace-1",
            AgentMessage::of_kind(MessageKind::StageResult),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn injects_keep_alive_during_long_steps() {
        // One substantive event, then the step hangs forever.
        let inner = stream::iter(vec![stage_event()]).chain(stream::pending());
        let mut heartbeats = Box::pin(HeartbeatStream::new(
            inner,
            Duration::from_secs(15),
            "trace-1".to_string(),
        ));

        let first = heartbeats.next().await.unwrap();
        assert_eq!(first.message.kind, MessageKind::StageResult);

        // Paused time auto-advances to the heartbeat deadline.
        let second = heartbeats.next().await.unwrap();
        assert_eq!(second.message.kind, MessageKind::KeepAlive);
        assert_eq!(second.status, EventStatus::Running);
        assert_eq!(second.trace_id, "trace-1");
        assert!(second.message.agent_state.is_none());

        let third = heartbeats.next().await.unwrap();
        assert_eq!(third.message.kind, MessageKind::KeepAlive);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_streams_produce_no_heartbeats() {
        let inner = stream::iter(vec![stage_event(), stage_event()]);
        let heartbeats = Box::pin(HeartbeatStream::new(
            inner,
            Duration::from_secs(15),
            "trace-1".to_string(),
        ));

        let events: Vec<AgentSseEvent> = heartbeats.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.message.kind == MessageKind::StageResult));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_stream_with_runtime_error() {
        // A step that never finishes; the wall-clock cap has to end the
        // stream on its own.
        let inner = stream::iter(vec![stage_event()]).chain(stream::pending());
        let mut events = Box::pin(DeadlineStream::new(
            inner,
            Duration::from_secs(600),
            "trace-1".to_string(),
        ));

        let first = events.next().await.unwrap();
        assert_eq!(first.message.kind, MessageKind::StageResult);

        let second = events.next().await.unwrap();
        assert_eq!(second.message.kind, MessageKind::RuntimeError);
        assert_eq!(second.status, EventStatus::Idle);
        assert!(second
            .message
            .content
            .as_deref()
            .unwrap()
            .contains("time limit"));

        assert!(events.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_passes_finished_streams_through() {
        let inner = stream::iter(vec![stage_event(), stage_event()]);
        let events: Vec<AgentSseEvent> = Box::pin(DeadlineStream::new(
            inner,
            Duration::from_secs(600),
            "trace-1".to_string(),
        ))
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.message.kind == MessageKind::StageResult));
    }
}
