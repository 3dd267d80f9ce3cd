use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::envelope::{Envelope, InboundEnvelope};
use crate::id::{ConversationId, TaskId, WorkspaceId};
use crate::model::{
    AgentPhase, AgentStatus, AiContext, ChatMessage, ChatScope, CommentPayload, CommentRef,
    ConversationRef, ConversationStatus, Kanban, Notification, Presence, ReactionPayload,
    ReactionRef, Task, TaskUpdate, TypingStatus, WorkspaceChange,
};
use crate::ProtoError;

/// Every inbound event name this client understands. Names outside this
/// set decode to `None` and are ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskUpdated,
    KanbanUpdated,
    NotificationCreated,
    PersonalChatMessage,
    TeamChatMessage,
    ChatMessage,
    UserOnline,
    UserOffline,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    CommentReactionAdded,
    CommentReactionRemoved,
    AiContextResponse,
    AiContextUpdated,
    AiTypingStart,
    AiTypingStop,
    AiAgentStatus,
    WorkspaceChange,
    AiConversationStatus,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::TaskUpdated,
        EventKind::KanbanUpdated,
        EventKind::NotificationCreated,
        EventKind::PersonalChatMessage,
        EventKind::TeamChatMessage,
        EventKind::ChatMessage,
        EventKind::UserOnline,
        EventKind::UserOffline,
        EventKind::CommentCreated,
        EventKind::CommentUpdated,
        EventKind::CommentDeleted,
        EventKind::CommentReactionAdded,
        EventKind::CommentReactionRemoved,
        EventKind::AiContextResponse,
        EventKind::AiContextUpdated,
        EventKind::AiTypingStart,
        EventKind::AiTypingStop,
        EventKind::AiAgentStatus,
        EventKind::WorkspaceChange,
        EventKind::AiConversationStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskUpdated => "task-updated",
            EventKind::KanbanUpdated => "kanban-updated",
            EventKind::NotificationCreated => "notification-created",
            EventKind::PersonalChatMessage => "personal-chat-message",
            EventKind::TeamChatMessage => "team-chat-message",
            EventKind::ChatMessage => "chat-message",
            EventKind::UserOnline => "user-online",
            EventKind::UserOffline => "user-offline",
            EventKind::CommentCreated => "comment-created",
            EventKind::CommentUpdated => "comment-updated",
            EventKind::CommentDeleted => "comment-deleted",
            EventKind::CommentReactionAdded => "comment-reaction-added",
            EventKind::CommentReactionRemoved => "comment-reaction-removed",
            EventKind::AiContextResponse => "ai-context-response",
            EventKind::AiContextUpdated => "ai-context-updated",
            EventKind::AiTypingStart => "ai-typing-start",
            EventKind::AiTypingStop => "ai-typing-stop",
            EventKind::AiAgentStatus => "ai-agent-status",
            EventKind::WorkspaceChange => "workspace-change",
            EventKind::AiConversationStatus => "ai-conversation-status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TaskUpdated(TaskUpdate),
    KanbanUpdated(Kanban),
    NotificationCreated(Notification),
    ChatMessage {
        scope: ChatScope,
        message: ChatMessage,
    },
    UserOnline(Presence),
    UserOffline(Presence),
    CommentCreated(CommentPayload),
    CommentUpdated(CommentPayload),
    CommentDeleted(CommentRef),
    CommentReactionAdded(ReactionPayload),
    CommentReactionRemoved(ReactionRef),
    AiContextResponse(AiContext),
    AiContextUpdated(ConversationRef),
    AiTypingStart(TypingStatus),
    AiTypingStop(TypingStatus),
    AiAgentStatus(AgentStatus),
    WorkspaceChange(WorkspaceChange),
    AiConversationStatus(ConversationStatus),
}

impl ServerEvent {
    /// Parses a raw text frame. `Ok(None)` means the frame was well formed
    /// but names an event this client does not know.
    pub fn decode(raw: &str) -> Result<Option<Self>, ProtoError> {
        let envelope = InboundEnvelope::parse(raw)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: InboundEnvelope) -> Result<Option<Self>, ProtoError> {
        let Some(kind) = EventKind::from_name(&envelope.event) else {
            return Ok(None);
        };
        let data = envelope.data;
        let event = match kind {
            EventKind::TaskUpdated => ServerEvent::TaskUpdated(payload(kind, data)?),
            EventKind::KanbanUpdated => ServerEvent::KanbanUpdated(payload(kind, data)?),
            EventKind::NotificationCreated => {
                ServerEvent::NotificationCreated(payload(kind, data)?)
            }
            EventKind::PersonalChatMessage => ServerEvent::ChatMessage {
                scope: ChatScope::Personal,
                message: payload(kind, data)?,
            },
            EventKind::TeamChatMessage => ServerEvent::ChatMessage {
                scope: ChatScope::Team,
                message: payload(kind, data)?,
            },
            EventKind::ChatMessage => ServerEvent::ChatMessage {
                scope: ChatScope::Room,
                message: payload(kind, data)?,
            },
            EventKind::UserOnline => ServerEvent::UserOnline(payload(kind, data)?),
            EventKind::UserOffline => ServerEvent::UserOffline(payload(kind, data)?),
            EventKind::CommentCreated => ServerEvent::CommentCreated(payload(kind, data)?),
            EventKind::CommentUpdated => ServerEvent::CommentUpdated(payload(kind, data)?),
            EventKind::CommentDeleted => ServerEvent::CommentDeleted(payload(kind, data)?),
            EventKind::CommentReactionAdded => {
                ServerEvent::CommentReactionAdded(payload(kind, data)?)
            }
            EventKind::CommentReactionRemoved => {
                ServerEvent::CommentReactionRemoved(payload(kind, data)?)
            }
            EventKind::AiContextResponse => ServerEvent::AiContextResponse(payload(kind, data)?),
            EventKind::AiContextUpdated => ServerEvent::AiContextUpdated(payload(kind, data)?),
            EventKind::AiTypingStart => ServerEvent::AiTypingStart(payload(kind, data)?),
            EventKind::AiTypingStop => ServerEvent::AiTypingStop(payload(kind, data)?),
            EventKind::AiAgentStatus => ServerEvent::AiAgentStatus(payload(kind, data)?),
            EventKind::WorkspaceChange => ServerEvent::WorkspaceChange(payload(kind, data)?),
            EventKind::AiConversationStatus => {
                ServerEvent::AiConversationStatus(payload(kind, data)?)
            }
        };
        Ok(Some(event))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::TaskUpdated(_) => EventKind::TaskUpdated,
            ServerEvent::KanbanUpdated(_) => EventKind::KanbanUpdated,
            ServerEvent::NotificationCreated(_) => EventKind::NotificationCreated,
            ServerEvent::ChatMessage { scope, .. } => match scope {
                ChatScope::Personal => EventKind::PersonalChatMessage,
                ChatScope::Team => EventKind::TeamChatMessage,
                ChatScope::Room => EventKind::ChatMessage,
            },
            ServerEvent::UserOnline(_) => EventKind::UserOnline,
            ServerEvent::UserOffline(_) => EventKind::UserOffline,
            ServerEvent::CommentCreated(_) => EventKind::CommentCreated,
            ServerEvent::CommentUpdated(_) => EventKind::CommentUpdated,
            ServerEvent::CommentDeleted(_) => EventKind::CommentDeleted,
            ServerEvent::CommentReactionAdded(_) => EventKind::CommentReactionAdded,
            ServerEvent::CommentReactionRemoved(_) => EventKind::CommentReactionRemoved,
            ServerEvent::AiContextResponse(_) => EventKind::AiContextResponse,
            ServerEvent::AiContextUpdated(_) => EventKind::AiContextUpdated,
            ServerEvent::AiTypingStart(_) => EventKind::AiTypingStart,
            ServerEvent::AiTypingStop(_) => EventKind::AiTypingStop,
            ServerEvent::AiAgentStatus(_) => EventKind::AiAgentStatus,
            ServerEvent::WorkspaceChange(_) => EventKind::WorkspaceChange,
            ServerEvent::AiConversationStatus(_) => EventKind::AiConversationStatus,
        }
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, ProtoError> {
    serde_json::from_value(data).map_err(|source| ProtoError::Payload {
        event: kind.as_str(),
        source,
    })
}

/// Events the client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinWorkspace { workspace_id: WorkspaceId },
    LeaveWorkspace { workspace_id: WorkspaceId },
    JoinTask { task_id: TaskId },
    LeaveTask { task_id: TaskId },
    TaskUpdate(Task),
    CommentCreated(CommentPayload),
    CommentUpdated(CommentPayload),
    CommentDeleted(CommentRef),
    CommentReactionAdded(ReactionPayload),
    CommentReactionRemoved(ReactionRef),
    AiContextRequest { conversation_id: ConversationId },
    AiTypingStart { conversation_id: ConversationId },
    AiTypingStop { conversation_id: ConversationId },
    AiAgentStatus {
        conversation_id: ConversationId,
        status: AgentPhase,
        thinking_budget: Option<u32>,
    },
    WorkspaceActivityStream { subscribe: bool },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinWorkspace { .. } => "join-workspace",
            ClientEvent::LeaveWorkspace { .. } => "leave-workspace",
            ClientEvent::JoinTask { .. } => "join-task",
            ClientEvent::LeaveTask { .. } => "leave-task",
            ClientEvent::TaskUpdate(_) => "task-update",
            ClientEvent::CommentCreated(_) => "comment-created",
            ClientEvent::CommentUpdated(_) => "comment-updated",
            ClientEvent::CommentDeleted(_) => "comment-deleted",
            ClientEvent::CommentReactionAdded(_) => "comment-reaction-added",
            ClientEvent::CommentReactionRemoved(_) => "comment-reaction-removed",
            ClientEvent::AiContextRequest { .. } => "ai-context-request",
            ClientEvent::AiTypingStart { .. } => "ai-typing-start",
            ClientEvent::AiTypingStop { .. } => "ai-typing-stop",
            ClientEvent::AiAgentStatus { .. } => "ai-agent-status",
            ClientEvent::WorkspaceActivityStream { .. } => "workspace-activity-stream",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            ClientEvent::JoinWorkspace { workspace_id }
            | ClientEvent::LeaveWorkspace { workspace_id } => {
                json!({ "workspaceId": workspace_id })
            }
            ClientEvent::JoinTask { task_id } | ClientEvent::LeaveTask { task_id } => {
                json!({ "taskId": task_id })
            }
            ClientEvent::TaskUpdate(task) => to_value(task),
            ClientEvent::CommentCreated(payload) | ClientEvent::CommentUpdated(payload) => {
                to_value(payload)
            }
            ClientEvent::CommentDeleted(reference) => to_value(reference),
            ClientEvent::CommentReactionAdded(payload) => to_value(payload),
            ClientEvent::CommentReactionRemoved(reference) => to_value(reference),
            ClientEvent::AiContextRequest { conversation_id }
            | ClientEvent::AiTypingStart { conversation_id }
            | ClientEvent::AiTypingStop { conversation_id } => {
                json!({ "conversationId": conversation_id })
            }
            ClientEvent::AiAgentStatus {
                conversation_id,
                status,
                thinking_budget,
            } => json!({
                "conversationId": conversation_id,
                "status": status,
                "thinkingBudget": thinking_budget,
            }),
            ClientEvent::WorkspaceActivityStream { subscribe } => json!({ "subscribe": subscribe }),
        }
    }

    pub fn into_envelope(self, timestamp: OffsetDateTime) -> Envelope {
        Envelope {
            event: self.name().to_string(),
            data: self.data(),
            timestamp,
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CommentId, UserId};

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("brand-new-event"), None);
    }

    #[test]
    fn unknown_events_decode_to_none() {
        let decoded = ServerEvent::decode(r#"{"event":"workspace-joined","data":{}}"#).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn known_event_with_bad_payload_is_an_error() {
        let err = ServerEvent::decode(r#"{"event":"task-updated","data":{"title":"x"}}"#)
            .unwrap_err();
        match err {
            ProtoError::Payload { event, .. } => assert_eq!(event, "task-updated"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn chat_scope_follows_event_name() {
        let raw = r#"{"event":"team-chat-message","data":{"conversationId":"conv-1","content":"hey"}}"#;
        let event = ServerEvent::decode(raw).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::TeamChatMessage);
        match event {
            ServerEvent::ChatMessage { scope, message } => {
                assert_eq!(scope, ChatScope::Team);
                assert_eq!(message.content, "hey");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn comment_deleted_decodes_from_type_payload_frame() {
        let raw = r#"{"type":"comment-deleted","payload":{"taskId":"t1","commentId":"c1","deletedBy":"u2"}}"#;
        let event = ServerEvent::decode(raw).unwrap().unwrap();
        assert_eq!(
            event,
            ServerEvent::CommentDeleted(CommentRef {
                task_id: TaskId::new("t1"),
                comment_id: CommentId::new("c1"),
            })
        );
    }

    #[test]
    fn client_event_envelope_uses_wire_names() {
        let env = ClientEvent::WorkspaceActivityStream { subscribe: false }
            .into_envelope(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(env.event, "workspace-activity-stream");
        assert_eq!(env.data, json!({"subscribe": false}));

        let env = ClientEvent::AiAgentStatus {
            conversation_id: ConversationId::new("conv"),
            status: AgentPhase::Thinking,
            thinking_budget: Some(4),
        }
        .into_envelope(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(env.data["status"], "thinking");
        assert_eq!(env.data["thinkingBudget"], 4);
    }

    #[test]
    fn presence_payload_decodes() {
        let raw = r#"{"event":"user-online","data":{"userId":"u7","workspaceId":"w1"}}"#;
        let event = ServerEvent::decode(raw).unwrap().unwrap();
        assert_eq!(
            event,
            ServerEvent::UserOnline(Presence {
                user_id: UserId::new("u7"),
                workspace_id: Some(WorkspaceId::new("w1")),
            })
        );
    }
}
