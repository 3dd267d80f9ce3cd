//! Shared entity and envelope definitions for the Krushr realtime client.
//! Kept free of runtime dependencies so tools and tests can decode socket
//! traffic without pulling in tokio or the HTTP stack.

mod envelope;
mod event;
mod id;
mod model;

pub use envelope::{Envelope, InboundEnvelope};
pub use event::{ClientEvent, EventKind, ServerEvent};
pub use id::{
    CommentId, ConversationId, KanbanId, NotificationId, ReactionId, TaskId, UserId, WorkspaceId,
    TEMP_ID_PREFIX,
};
pub use model::*;

use thiserror::Error;

/// Errors raised while decoding inbound socket traffic.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid `{event}` payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
