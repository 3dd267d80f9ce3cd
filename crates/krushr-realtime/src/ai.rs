use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use krushr_proto::{
    AgentPhase, AgentStatus, AiContext, ClientEvent, ConversationId, ConversationRef,
    ConversationStatus, TypingStatus, UserId,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::bus::{ResourceBus, Subscription, Topic};
use crate::connection::ConnectionManager;

#[derive(Default)]
struct AiState {
    contexts: HashMap<ConversationId, Value>,
    typing: HashMap<ConversationId, BTreeMap<UserId, TypingStatus>>,
    agents: HashMap<ConversationId, AgentStatus>,
    conversations: HashMap<ConversationId, ConversationStatus>,
}

/// Caches the AI-specific realtime state and issues the matching requests.
#[derive(Clone)]
pub struct AiRealtime {
    connection: ConnectionManager,
    bus: ResourceBus,
    state: Arc<RwLock<AiState>>,
}

impl AiRealtime {
    pub fn new(connection: ConnectionManager, bus: ResourceBus) -> Self {
        Self {
            connection,
            bus,
            state: Arc::default(),
        }
    }

    /// Follows a conversation. The first subscriber triggers a context
    /// request; whatever context is already cached is returned right away.
    pub fn subscribe_context(&self, conversation: ConversationId) -> (Subscription, Option<Value>) {
        let cached = self.context(&conversation);
        let subscription = self.bus.subscribe(Topic::Conversation(conversation));
        (subscription, cached)
    }

    pub fn subscribe_workspace_activity(&self) -> Subscription {
        self.bus.subscribe(Topic::WorkspaceActivity)
    }

    pub fn request_context(&self, conversation: &ConversationId) -> bool {
        self.connection.send(ClientEvent::AiContextRequest {
            conversation_id: conversation.clone(),
        })
    }

    pub fn start_typing(&self, conversation: &ConversationId) -> bool {
        self.connection.send(ClientEvent::AiTypingStart {
            conversation_id: conversation.clone(),
        })
    }

    pub fn stop_typing(&self, conversation: &ConversationId) -> bool {
        self.connection.send(ClientEvent::AiTypingStop {
            conversation_id: conversation.clone(),
        })
    }

    pub fn send_agent_status(
        &self,
        conversation: &ConversationId,
        status: AgentPhase,
        thinking_budget: Option<u32>,
    ) -> bool {
        self.connection.send(ClientEvent::AiAgentStatus {
            conversation_id: conversation.clone(),
            status,
            thinking_budget,
        })
    }

    pub fn context(&self, conversation: &ConversationId) -> Option<Value> {
        self.state.read().contexts.get(conversation).cloned()
    }

    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.state
            .read()
            .typing
            .get(conversation)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn agent_status(&self, conversation: &ConversationId) -> Option<AgentStatus> {
        self.state.read().agents.get(conversation).cloned()
    }

    pub fn conversation_status(&self, conversation: &ConversationId) -> Option<ConversationStatus> {
        self.state.read().conversations.get(conversation).cloned()
    }

    pub(crate) fn on_context_response(&self, response: &AiContext) {
        self.state
            .write()
            .contexts
            .insert(response.conversation_id.clone(), response.context.clone());
    }

    /// The server's context changed; refresh it if anyone is still watching.
    pub(crate) fn on_context_updated(&self, reference: &ConversationRef) {
        let topic = Topic::Conversation(reference.conversation_id.clone());
        if self.bus.subscriber_count(&topic) > 0 {
            debug!(
                target: "realtime::ai",
                conversation = %reference.conversation_id,
                "context updated; re-requesting"
            );
            self.request_context(&reference.conversation_id);
        } else {
            self.state.write().contexts.remove(&reference.conversation_id);
        }
    }

    pub(crate) fn on_typing(&self, status: &TypingStatus, typing: bool) {
        let mut state = self.state.write();
        let users = state
            .typing
            .entry(status.conversation_id.clone())
            .or_default();
        if typing {
            users.insert(status.user_id.clone(), status.clone());
        } else {
            users.remove(&status.user_id);
            if users.is_empty() {
                state.typing.remove(&status.conversation_id);
            }
        }
    }

    pub(crate) fn on_agent_status(&self, status: &AgentStatus) {
        self.state
            .write()
            .agents
            .insert(status.conversation_id.clone(), status.clone());
    }

    pub(crate) fn on_conversation_status(&self, status: &ConversationStatus) {
        self.state
            .write()
            .conversations
            .insert(status.conversation_id.clone(), status.clone());
    }
}
