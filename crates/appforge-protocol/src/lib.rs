//! Wire types for the appforge agent protocol.
//!
//! Defines the request and event shapes exchanged between clients and the
//! code-generation service: the conversation history submitted with each
//! request, the streamed event envelope, and the per-step diff metadata.
//! All session progress travels inside these types; the service keeps no
//! state of its own between requests.

pub mod events;
pub mod messages;
pub mod request;

pub use events::{AgentSseEvent, EventStatus};
pub use messages::{
    AgentMessage, ConversationMessage, DiffStatEntry, FileEntry, MessageBlock, MessageKind,
};
pub use request::AgentRequest;
