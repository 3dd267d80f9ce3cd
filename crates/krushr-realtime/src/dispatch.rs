use std::sync::Arc;

use krushr_proto::ServerEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::ai::AiRealtime;
use crate::bus::{ResourceBus, Topic};
use crate::store::{CommentThreadStore, NotificationStore, PresenceStore, TaskStore};

const FIREHOSE_CAPACITY: usize = 256;

/// Routes decoded server events to the stores and to resource subscribers.
///
/// Frames are handled one at a time, in arrival order, and every handler is
/// synchronous.
#[derive(Clone)]
pub struct EventDispatcher {
    tasks: TaskStore,
    notifications: NotificationStore,
    presence: PresenceStore,
    comments: CommentThreadStore,
    ai: AiRealtime,
    bus: ResourceBus,
    firehose: broadcast::Sender<Arc<ServerEvent>>,
}

impl EventDispatcher {
    pub fn new(
        tasks: TaskStore,
        notifications: NotificationStore,
        presence: PresenceStore,
        comments: CommentThreadStore,
        ai: AiRealtime,
        bus: ResourceBus,
    ) -> Self {
        Self {
            tasks,
            notifications,
            presence,
            comments,
            ai,
            bus,
            firehose: broadcast::channel(FIREHOSE_CAPACITY).0,
        }
    }

    /// Every decoded event, after the stores have been updated.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.firehose.subscribe()
    }

    pub fn spawn(self, frames: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        tokio::spawn(self.run(frames))
    }

    pub async fn run(self, mut frames: mpsc::UnboundedReceiver<String>) {
        while let Some(frame) = frames.recv().await {
            self.handle_frame(&frame);
        }
        debug!(target: "realtime::dispatch", "frame channel closed; dispatcher exiting");
    }

    /// Decodes and applies one frame. Malformed frames are logged and dropped.
    pub fn handle_frame(&self, raw: &str) {
        match ServerEvent::decode(raw) {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => trace!(target: "realtime::dispatch", "ignoring unknown event"),
            Err(err) => warn!(
                target: "realtime::dispatch",
                error = %err,
                frame = %truncate(raw, 256),
                "dropping malformed frame"
            ),
        }
    }

    pub fn handle_event(&self, event: ServerEvent) {
        let kind = event.kind();
        trace!(target: "realtime::dispatch", event = kind.as_str(), "dispatching");
        let event = Arc::new(event);
        match event.as_ref() {
            ServerEvent::TaskUpdated(update) => {
                if !self.tasks.apply_update(update) {
                    debug!(target: "realtime::dispatch", task = %update.id, "update for unknown task");
                }
                self.publish(Topic::Task(update.id.clone()), &event);
            }
            ServerEvent::KanbanUpdated(kanban) => {
                self.tasks.upsert_kanban(kanban.clone());
                if let Some(workspace) = &kanban.workspace_id {
                    self.publish(Topic::Workspace(workspace.clone()), &event);
                }
            }
            ServerEvent::NotificationCreated(notification) => {
                self.notifications.push(notification.clone());
            }
            ServerEvent::ChatMessage { message, .. } => {
                self.publish(Topic::Conversation(message.conversation_id.clone()), &event);
            }
            ServerEvent::UserOnline(presence) => {
                self.presence.set_online(presence.user_id.clone());
                if let Some(workspace) = &presence.workspace_id {
                    self.publish(Topic::Workspace(workspace.clone()), &event);
                }
            }
            ServerEvent::UserOffline(presence) => {
                self.presence.set_offline(&presence.user_id);
                if let Some(workspace) = &presence.workspace_id {
                    self.publish(Topic::Workspace(workspace.clone()), &event);
                }
            }
            ServerEvent::CommentCreated(payload) => {
                self.comments.add_comment(payload.comment.clone());
                self.publish(Topic::Task(payload.task_id.clone()), &event);
            }
            ServerEvent::CommentUpdated(payload) => {
                self.comments.merge_server_comment(&payload.comment);
                self.publish(Topic::Task(payload.task_id.clone()), &event);
            }
            ServerEvent::CommentDeleted(reference) => {
                if let Err(err) = self.comments.delete_comment(&reference.comment_id) {
                    debug!(target: "realtime::dispatch", error = %err, "comment-deleted ignored");
                }
                self.publish(Topic::Task(reference.task_id.clone()), &event);
            }
            ServerEvent::CommentReactionAdded(payload) => {
                self.comments.add_reaction(payload.reaction.clone());
                self.publish(Topic::Task(payload.task_id.clone()), &event);
            }
            ServerEvent::CommentReactionRemoved(reference) => {
                self.comments
                    .remove_reaction(&reference.comment_id, &reference.reaction_id);
                self.publish(Topic::Task(reference.task_id.clone()), &event);
            }
            ServerEvent::AiContextResponse(response) => {
                self.ai.on_context_response(response);
                self.publish(Topic::Conversation(response.conversation_id.clone()), &event);
            }
            ServerEvent::AiContextUpdated(reference) => {
                self.ai.on_context_updated(reference);
            }
            ServerEvent::AiTypingStart(status) => {
                self.ai.on_typing(status, true);
                self.publish(Topic::Conversation(status.conversation_id.clone()), &event);
            }
            ServerEvent::AiTypingStop(status) => {
                self.ai.on_typing(status, false);
                self.publish(Topic::Conversation(status.conversation_id.clone()), &event);
            }
            ServerEvent::AiAgentStatus(status) => {
                self.ai.on_agent_status(status);
                self.publish(Topic::Conversation(status.conversation_id.clone()), &event);
            }
            ServerEvent::WorkspaceChange(change) => {
                self.publish(Topic::Workspace(change.workspace_id.clone()), &event);
                self.publish(Topic::WorkspaceActivity, &event);
            }
            ServerEvent::AiConversationStatus(status) => {
                self.ai.on_conversation_status(status);
                self.publish(Topic::Conversation(status.conversation_id.clone()), &event);
            }
        }
        let _ = self.firehose.send(event);
    }

    fn publish(&self, topic: Topic, event: &Arc<ServerEvent>) {
        self.bus.publish(topic, event.clone());
    }
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
