//! The per-login context that owns every realtime component.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use krushr_proto::{
    ClientEvent, Comment, CommentId, CommentPatch, NewComment, NewTask, NotificationId,
    ReactionPayload, ReactionRef, ReactionToggle, ServerEvent, Task, TaskId, TaskPatch,
    TaskUpdate, UserId, WorkspaceId,
};
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ai::AiRealtime;
use crate::bus::{MembershipHook, ResourceBus, Subscription, Topic};
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::dispatch::EventDispatcher;
use crate::error::{MutationError, RpcError};
use crate::optimistic::{MutationFailure, OptimisticCoordinator, ReactionToggles};
use crate::rpc::{HttpApi, RealtimeApi};
use crate::store::{
    CommentThread, CommentThreadStore, DraftAutosaver, NotificationStore, PresenceStore,
    ReactionSummary, SortOrder, TaskStore,
};
use crate::toasts::{DismissReason, ToastEvent, ToastQueue};

const FAILURE_CAPACITY: usize = 64;

/// Socket event announcing that this client wants updates for `topic`.
pub(crate) fn join_event(topic: &Topic) -> Option<ClientEvent> {
    match topic {
        Topic::Task(task_id) => Some(ClientEvent::JoinTask {
            task_id: task_id.clone(),
        }),
        Topic::Workspace(workspace_id) => Some(ClientEvent::JoinWorkspace {
            workspace_id: workspace_id.clone(),
        }),
        Topic::WorkspaceActivity => Some(ClientEvent::WorkspaceActivityStream { subscribe: true }),
        Topic::Conversation(conversation_id) => Some(ClientEvent::AiContextRequest {
            conversation_id: conversation_id.clone(),
        }),
    }
}

pub(crate) fn leave_event(topic: &Topic) -> Option<ClientEvent> {
    match topic {
        Topic::Task(task_id) => Some(ClientEvent::LeaveTask {
            task_id: task_id.clone(),
        }),
        Topic::Workspace(workspace_id) => Some(ClientEvent::LeaveWorkspace {
            workspace_id: workspace_id.clone(),
        }),
        Topic::WorkspaceActivity => Some(ClientEvent::WorkspaceActivityStream { subscribe: false }),
        Topic::Conversation(_) => None,
    }
}

struct RoomMembership {
    connection: ConnectionManager,
}

impl MembershipHook for RoomMembership {
    fn first_joined(&self, topic: &Topic) {
        if let Some(event) = join_event(topic) {
            self.connection.send(event);
        }
    }

    fn last_left(&self, topic: &Topic) {
        if let Some(event) = leave_event(topic) {
            self.connection.send(event);
        }
    }
}

/// Everything one signed-in client needs: stores, socket, dispatcher loop,
/// optimistic coordinators, toast queue and AI client.
///
/// Construct it inside a tokio runtime; background tasks are stopped and the
/// socket closed when the session is dropped.
pub struct RealtimeSession {
    api: Arc<dyn RealtimeApi>,
    connection: ConnectionManager,
    bus: ResourceBus,
    dispatcher: EventDispatcher,
    tasks: OptimisticCoordinator<TaskStore>,
    comments: OptimisticCoordinator<CommentThreadStore>,
    reaction_toggles: ReactionToggles,
    notifications: NotificationStore,
    presence: PresenceStore,
    ai: AiRealtime,
    toasts: ToastQueue,
    failures: broadcast::Sender<MutationFailure>,
    current_user: RwLock<Option<UserId>>,
    rpc_timeout: Duration,
    draft_interval: Duration,
    background: Vec<JoinHandle<()>>,
}

impl RealtimeSession {
    /// Session talking to the configured tRPC endpoint.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        let mut api = HttpApi::new(config.rpc_url());
        if let Some(token) = &config.auth_token {
            api = api.with_token(token.clone());
        }
        Self::new(config, Arc::new(api))
    }

    pub fn new(config: &RealtimeConfig, api: Arc<dyn RealtimeApi>) -> Self {
        let (connection, frames) =
            ConnectionManager::new(config.ws_url(), config.reconnect_policy());
        let bus = ResourceBus::new();
        bus.set_membership_hook(Arc::new(RoomMembership {
            connection: connection.clone(),
        }));

        let task_store = TaskStore::new();
        let comment_store = CommentThreadStore::new();
        let notifications = NotificationStore::new();
        let presence = PresenceStore::new();
        let ai = AiRealtime::new(connection.clone(), bus.clone());
        let (failures, _) = broadcast::channel(FAILURE_CAPACITY);

        let dispatcher = EventDispatcher::new(
            task_store.clone(),
            notifications.clone(),
            presence.clone(),
            comment_store.clone(),
            ai.clone(),
            bus.clone(),
        );
        let toasts = ToastQueue::new(notifications.clone(), config.toast_limit, config.toast_ttl());

        let rpc_timeout = config.rpc_timeout();
        let background = vec![
            dispatcher.clone().spawn(frames),
            toasts.spawn(),
            spawn_read_receipts(&toasts, api.clone(), rpc_timeout),
            spawn_rejoin(&connection, &bus),
        ];

        Self {
            reaction_toggles: ReactionToggles::new(
                comment_store.clone(),
                rpc_timeout,
                failures.clone(),
            ),
            tasks: OptimisticCoordinator::new(task_store, rpc_timeout, failures.clone())
                .with_peers(connection.clone()),
            comments: OptimisticCoordinator::new(comment_store, rpc_timeout, failures.clone())
                .with_peers(connection.clone()),
            api,
            connection,
            bus,
            dispatcher,
            notifications,
            presence,
            ai,
            toasts,
            failures,
            current_user: RwLock::new(None),
            rpc_timeout,
            draft_interval: config.draft_autosave_interval(),
            background,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn tasks(&self) -> &TaskStore {
        self.tasks.target()
    }

    pub fn comments(&self) -> &CommentThreadStore {
        self.comments.target()
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn ai(&self) -> &AiRealtime {
        &self.ai
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.current_user.read().clone()
    }

    /// Every mutation that failed and was rolled back.
    pub fn failures(&self) -> broadcast::Receiver<MutationFailure> {
        self.failures.subscribe()
    }

    /// Every decoded server event, after the stores have applied it.
    pub fn events(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.dispatcher.subscribe_all()
    }

    pub fn login(&self, user: UserId) -> bool {
        info!(target: "realtime::connection", user = %user, "session login");
        *self.current_user.write() = Some(user);
        self.connection.set_authenticated(true);
        self.connection.connect()
    }

    pub fn logout(&self) {
        info!(target: "realtime::connection", "session logout");
        self.connection.set_authenticated(false);
        *self.current_user.write() = None;
        self.presence.clear();
    }

    /// Receives updates for one task and joins its room while subscribed.
    pub fn subscribe_task(&self, task: TaskId) -> Subscription {
        self.bus.subscribe(Topic::Task(task))
    }

    pub fn subscribe_workspace(&self, workspace: WorkspaceId) -> Subscription {
        self.bus.subscribe(Topic::Workspace(workspace))
    }

    pub async fn create_task(&self, input: NewTask) -> Result<Task, MutationError> {
        let placeholder = input
            .clone()
            .into_placeholder(TaskId::temporary(), OffsetDateTime::now_utc());
        self.tasks
            .create(placeholder, self.api.create_task(&input))
            .await
    }

    pub async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, MutationError> {
        let update = TaskUpdate {
            id: id.clone(),
            patch,
        };
        self.tasks
            .update(
                id,
                |store| {
                    store.apply_update(&update);
                    Ok(())
                },
                self.api.update_task(id, &update.patch),
            )
            .await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), MutationError> {
        self.tasks
            .delete(
                id,
                |store| {
                    store.remove(id);
                    Ok(())
                },
                self.api.delete_task(id),
            )
            .await
    }

    /// Replaces the task's comments with the server's list.
    pub async fn load_comments(&self, task: &TaskId) -> Result<usize, MutationError> {
        let store = self.comments();
        store.set_loading(task, true);
        let result = self.bounded(self.api.list_comments(task)).await;
        store.set_loading(task, false);
        let comments = result?;
        let count = comments.len();
        store.set_comments(task, comments);
        debug!(target: "realtime::rpc", task = %task, count, "comments loaded");
        Ok(count)
    }

    /// Posts a comment optimistically. A successful top-level comment clears
    /// the task's draft.
    pub async fn create_comment(&self, input: NewComment) -> Result<Comment, MutationError> {
        let author = self.require_user()?;
        let placeholder = input.clone().into_placeholder(
            CommentId::temporary(),
            author,
            OffsetDateTime::now_utc(),
        );
        let created = self
            .comments
            .create(placeholder, self.api.create_comment(&input))
            .await?;
        if input.parent_id.is_none() {
            self.comments().clear_draft(&input.task_id);
        }
        Ok(created)
    }

    pub async fn reply(
        &self,
        parent: &CommentId,
        content: impl Into<String>,
    ) -> Result<Comment, MutationError> {
        let task_id = self
            .comments()
            .comment(parent)
            .map(|c| c.task_id)
            .ok_or_else(|| MutationError::NotFound {
                kind: "comment",
                id: parent.to_string(),
            })?;
        self.create_comment(NewComment {
            task_id,
            content: content.into(),
            parent_id: Some(parent.clone()),
            attachments: Vec::new(),
        })
        .await
    }

    pub async fn edit_comment(
        &self,
        id: &CommentId,
        content: impl Into<String>,
    ) -> Result<Comment, MutationError> {
        let patch = CommentPatch::content(content);
        self.comments
            .update(
                id,
                |store| {
                    store.update_comment(id, &patch)?;
                    Ok(())
                },
                self.api.update_comment(id, &patch),
            )
            .await
    }

    pub async fn delete_comment(&self, id: &CommentId) -> Result<(), MutationError> {
        self.comments
            .delete(
                id,
                |store| {
                    store.delete_comment(id)?;
                    Ok(())
                },
                self.api.delete_comment(id),
            )
            .await
    }

    /// Flips the current user's `emoji` reaction locally, then settles it
    /// with the server's verdict or undoes it. A toggle overtaken by a newer
    /// one on the same emoji resolves as [`MutationError::Superseded`].
    pub async fn toggle_reaction(
        &self,
        comment_id: &CommentId,
        emoji: &str,
    ) -> Result<ReactionToggle, MutationError> {
        let user = self.require_user()?;
        let task_id = self
            .comments()
            .comment(comment_id)
            .map(|c| c.task_id)
            .ok_or_else(|| MutationError::NotFound {
                kind: "comment",
                id: comment_id.to_string(),
            })?;
        let server = self
            .reaction_toggles
            .toggle(
                comment_id,
                &user,
                emoji,
                self.api.toggle_reaction(comment_id, emoji),
            )
            .await?;
        self.connection.send(match &server {
            ReactionToggle::Added { reaction } => ClientEvent::CommentReactionAdded(ReactionPayload {
                task_id,
                comment_id: comment_id.clone(),
                reaction: reaction.clone(),
            }),
            ReactionToggle::Removed { reaction_id } => {
                ClientEvent::CommentReactionRemoved(ReactionRef {
                    task_id,
                    comment_id: comment_id.clone(),
                    reaction_id: reaction_id.clone(),
                })
            }
        });
        Ok(server)
    }

    pub fn threaded_comments(&self, task: &TaskId, order: SortOrder) -> Vec<CommentThread> {
        self.comments().threaded_comments(task, order)
    }

    /// Reaction summary for `comment_id` from the current user's viewpoint.
    /// Signed out, nothing counts as reacted by the viewer.
    pub fn reactions(&self, comment_id: &CommentId) -> Vec<ReactionSummary> {
        let viewer = self.current_user().unwrap_or_else(|| UserId::new(""));
        self.comments().aggregate_reactions(comment_id, &viewer)
    }

    pub fn draft_autosaver(&self, task: TaskId) -> DraftAutosaver {
        DraftAutosaver::spawn(self.comments().clone(), task, self.draft_interval)
    }

    pub async fn refresh_notifications(&self) -> Result<usize, MutationError> {
        let notifications = self.bounded(self.api.list_notifications()).await?;
        let count = notifications.len();
        self.notifications.set_all(notifications);
        Ok(count)
    }

    /// Marks read locally right away; the server call is not rolled back on
    /// failure since the toast for it is already gone.
    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), MutationError> {
        self.notifications.mark_read(id);
        self.bounded(self.api.mark_notification_read(id)).await
    }

    fn require_user(&self) -> Result<UserId, MutationError> {
        self.current_user()
            .ok_or_else(|| MutationError::Rejected("no user is logged in".into()))
    }

    async fn bounded<R, Fut>(&self, remote: Fut) -> Result<R, MutationError>
    where
        Fut: Future<Output = Result<R, RpcError>>,
    {
        bounded(self.rpc_timeout, remote).await
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
        self.connection.disconnect();
    }
}

async fn bounded<R, Fut>(limit: Duration, remote: Fut) -> Result<R, MutationError>
where
    Fut: Future<Output = Result<R, RpcError>>,
{
    match tokio::time::timeout(limit, remote).await {
        Ok(result) => result.map_err(MutationError::from),
        Err(_) => Err(MutationError::Timeout(limit)),
    }
}

/// Tells the server about toasts the user dismissed or that expired. Toasts
/// hidden because the notification was already read need no call.
fn spawn_read_receipts(
    toasts: &ToastQueue,
    api: Arc<dyn RealtimeApi>,
    limit: Duration,
) -> JoinHandle<()> {
    let mut events = toasts.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ToastEvent::Dismissed {
                    notification_id,
                    reason: DismissReason::User | DismissReason::Expired,
                }) => {
                    if let Err(err) =
                        bounded(limit, api.mark_notification_read(&notification_id)).await
                    {
                        warn!(
                            target: "realtime::toasts",
                            id = %notification_id,
                            error = %err,
                            "failed to mark notification read"
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(target: "realtime::toasts", skipped, "toast events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Rooms are server-side per channel, so each new channel re-joins every
/// topic that still has subscribers.
fn spawn_rejoin(connection: &ConnectionManager, bus: &ResourceBus) -> JoinHandle<()> {
    let connection = connection.clone();
    let bus = bus.clone();
    let mut status = connection.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current != ConnectionStatus::Connected {
                continue;
            }
            let topics = bus.active_topics();
            debug!(target: "realtime::connection", rooms = topics.len(), "rejoining rooms");
            for topic in topics {
                if let Some(event) = join_event(&topic) {
                    connection.send(event);
                }
            }
        }
    })
}
