mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{wait_for_status, TestServer, WAIT};
use krushr_proto::{
    Comment, CommentId, CommentPatch, EventKind, NewComment, NewTask, Notification,
    NotificationId, Reaction, ReactionId, ReactionToggle, Task, TaskId, TaskPatch, UserId,
};
use krushr_realtime::{
    ConnectionStatus, MutationError, MutationKind, RealtimeApi, RealtimeConfig, RealtimeSession,
    RpcError, SortOrder,
};
use parking_lot::Mutex;
use serde_json::json;
use time::OffsetDateTime;
use tokio::time::timeout;

/// In-memory stand-in for the Krushr API.
#[derive(Default)]
struct FakeApi {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<&'static str>>,
    comments: Mutex<Vec<Comment>>,
    notifications: Mutex<Vec<Notification>>,
    reactions: Mutex<HashMap<(CommentId, String), ReactionId>>,
    next_id: AtomicUsize,
}

impl FakeApi {
    fn fail(&self, procedure: &'static str) {
        self.failing.lock().push(procedure);
    }

    fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    fn record(&self, procedure: &'static str, detail: impl std::fmt::Display) -> Result<(), RpcError> {
        self.calls.lock().push(format!("{procedure}:{detail}"));
        if self.failing.lock().contains(&procedure) {
            return Err(RpcError::procedure(procedure, "boom"));
        }
        Ok(())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl RealtimeApi for FakeApi {
    async fn create_task(&self, input: &NewTask) -> Result<Task, RpcError> {
        self.record("task.create", &input.title)?;
        Ok(input
            .clone()
            .into_placeholder(TaskId::new(self.next("T")), OffsetDateTime::now_utc()))
    }

    async fn update_task(&self, id: &TaskId, _patch: &TaskPatch) -> Result<Task, RpcError> {
        self.record("task.update", id)?;
        Err(RpcError::procedure("task.update", "not supported by fake"))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RpcError> {
        self.record("task.delete", id)
    }

    async fn list_comments(&self, task: &TaskId) -> Result<Vec<Comment>, RpcError> {
        self.record("comment.list", task)?;
        Ok(self
            .comments
            .lock()
            .iter()
            .filter(|c| &c.task_id == task)
            .cloned()
            .collect())
    }

    async fn create_comment(&self, input: &NewComment) -> Result<Comment, RpcError> {
        self.record("comment.create", &input.task_id)?;
        let comment = input.clone().into_placeholder(
            CommentId::new(self.next("C")),
            UserId::new("u1"),
            OffsetDateTime::now_utc(),
        );
        self.comments.lock().push(comment.clone());
        Ok(comment)
    }

    async fn update_comment(
        &self,
        id: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RpcError> {
        self.record("comment.update", id)?;
        let mut comments = self.comments.lock();
        let comment = comments
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| RpcError::procedure("comment.update", "not found"))?;
        comment.apply(patch);
        comment.is_edited = true;
        Ok(comment.clone())
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<(), RpcError> {
        self.record("comment.delete", id)
    }

    async fn toggle_reaction(
        &self,
        comment: &CommentId,
        emoji: &str,
    ) -> Result<ReactionToggle, RpcError> {
        self.record("comment.toggleReaction", comment)?;
        let key = (comment.clone(), emoji.to_string());
        let mut reactions = self.reactions.lock();
        if let Some(reaction_id) = reactions.remove(&key) {
            return Ok(ReactionToggle::Removed { reaction_id });
        }
        let reaction = Reaction {
            id: ReactionId::new(self.next("R")),
            comment_id: comment.clone(),
            user_id: UserId::new("u1"),
            emoji: emoji.to_string(),
            created_at: OffsetDateTime::now_utc(),
            user: None,
        };
        reactions.insert(key, reaction.id.clone());
        Ok(ReactionToggle::Added { reaction })
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>, RpcError> {
        self.record("notification.list", "")?;
        Ok(self.notifications.lock().clone())
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), RpcError> {
        self.record("notification.markAsRead", id)
    }
}

fn comment(id: &str, task: &str) -> Comment {
    serde_json::from_value(json!({
        "id": id,
        "taskId": task,
        "authorId": "u2",
        "content": "original",
        "createdAt": "2024-05-01T10:00:00Z",
        "updatedAt": "2024-05-01T10:00:00Z",
    }))
    .unwrap()
}

fn notification(id: &str) -> Notification {
    serde_json::from_value(json!({
        "id": id,
        "type": "task_assigned",
        "title": "Assigned",
        "message": "You were assigned a task",
        "isRead": false,
        "createdAt": "2024-05-01T10:00:00Z",
    }))
    .unwrap()
}

/// Points at a port nobody listens on and gives up on the first failure.
fn offline_config() -> RealtimeConfig {
    RealtimeConfig {
        ws_url: Some("ws://127.0.0.1:9/ws".into()),
        max_reconnect_attempts: 0,
        ..RealtimeConfig::default()
    }
}

fn session_with(api: &Arc<FakeApi>) -> RealtimeSession {
    let session = RealtimeSession::new(&offline_config(), api.clone());
    session.login(UserId::new("u1"));
    session
}

async fn eventually<F: FnMut() -> bool>(mut check: F) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[test_timeout::tokio_timeout_test(20)]
async fn created_task_replaces_its_placeholder() {
    let api = Arc::new(FakeApi::default());
    let session = session_with(&api);

    let task = session
        .create_task(NewTask {
            title: "Ship it".into(),
            ..NewTask::default()
        })
        .await
        .unwrap();

    assert_eq!(task.id, TaskId::new("T-1"));
    let ids: Vec<_> = session.tasks().tasks().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![TaskId::new("T-1")]);
}

#[test_timeout::tokio_timeout_test(20)]
async fn failed_edit_rolls_back_and_is_reported() {
    let api = Arc::new(FakeApi::default());
    api.comments.lock().push(comment("C1", "T1"));
    let session = session_with(&api);
    let mut failures = session.failures();

    assert_eq!(session.load_comments(&TaskId::new("T1")).await.unwrap(), 1);
    assert!(!session.comments().is_loading(&TaskId::new("T1")));
    assert!(session.comments().last_updated(&TaskId::new("T1")).is_some());

    api.fail("comment.update");
    let err = session
        .edit_comment(&CommentId::new("C1"), "rewritten")
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Rpc(RpcError::Procedure { .. })));

    let restored = session.comments().comment(&CommentId::new("C1")).unwrap();
    assert_eq!(restored.content, "original");
    assert!(!restored.is_edited);

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.entity, "comment");
    assert_eq!(failure.id, "C1");
    assert_eq!(failure.kind, MutationKind::Update);
}

#[test_timeout::tokio_timeout_test(20)]
async fn posting_clears_the_draft_and_replies_join_the_thread() {
    let api = Arc::new(FakeApi::default());
    api.comments.lock().push(comment("C1", "T1"));
    let session = session_with(&api);
    let task = TaskId::new("T1");
    session.load_comments(&task).await.unwrap();

    session.comments().save_draft(&task, "half a thought");
    let posted = session
        .create_comment(NewComment {
            task_id: task.clone(),
            content: "a full thought".into(),
            ..NewComment::default()
        })
        .await
        .unwrap();
    assert!(!posted.id.is_temporary());
    assert_eq!(session.comments().draft(&task), None);

    let reply = session.reply(&CommentId::new("C1"), "agreed").await.unwrap();
    let threads = session.threaded_comments(&task, SortOrder::Ascending);
    let root = threads
        .iter()
        .find(|t| t.comment.id == CommentId::new("C1"))
        .unwrap();
    assert_eq!(root.replies.len(), 1);
    assert_eq!(root.replies[0].id, reply.id);
    assert_eq!(session.comments().comment_count(&task), 3);
}

#[test_timeout::tokio_timeout_test(20)]
async fn autosaved_draft_is_cleared_by_posting() {
    let api = Arc::new(FakeApi::default());
    let session = session_with(&api);
    let task = TaskId::new("T1");
    session.comments().save_draft(&task, "resume me");

    let saver = session.draft_autosaver(task.clone());
    assert_eq!(saver.task(), &task);
    saver.update("resume me, edited");
    saver.flush();
    assert_eq!(
        session.comments().draft(&task).as_deref(),
        Some("resume me, edited")
    );
    drop(saver);

    session
        .create_comment(NewComment {
            task_id: task.clone(),
            content: "resume me, edited".into(),
            ..NewComment::default()
        })
        .await
        .unwrap();
    assert_eq!(session.comments().draft(&task), None);
}

#[test_timeout::tokio_timeout_test(20)]
async fn commenting_requires_a_signed_in_user() {
    let api = Arc::new(FakeApi::default());
    let session = RealtimeSession::new(&offline_config(), api.clone());
    let err = session
        .create_comment(NewComment {
            task_id: TaskId::new("T1"),
            content: "hello".into(),
            ..NewComment::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Rejected(_)));
    assert!(api.calls.lock().is_empty());
}

#[test_timeout::tokio_timeout_test(20)]
async fn reaction_toggles_settle_on_the_server_id() {
    let api = Arc::new(FakeApi::default());
    api.comments.lock().push(comment("C1", "T1"));
    let session = session_with(&api);
    let mut failures = session.failures();
    session.load_comments(&TaskId::new("T1")).await.unwrap();
    let c1 = CommentId::new("C1");

    session.toggle_reaction(&c1, "👍").await.unwrap();
    let stored = session.comments().comment(&c1).unwrap();
    assert_eq!(stored.reactions().len(), 1);
    assert_eq!(stored.reactions()[0].id, ReactionId::new("R-1"));
    let summary = session.reactions(&c1);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].count, 1);
    assert!(summary[0].reacted_by_current_user);

    session.toggle_reaction(&c1, "👍").await.unwrap();
    assert!(session.comments().comment(&c1).unwrap().reactions().is_empty());

    api.fail("comment.toggleReaction");
    assert!(session.toggle_reaction(&c1, "🎉").await.is_err());
    assert!(session.comments().comment(&c1).unwrap().reactions().is_empty());
    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.entity, "reaction");
    assert_eq!(failure.kind, MutationKind::Create);
}

#[test_timeout::tokio_timeout_test(20)]
async fn dismissed_toasts_mark_notifications_read_on_the_server() {
    let api = Arc::new(FakeApi::default());
    api.notifications.lock().push(notification("N1"));
    let session = session_with(&api);

    assert_eq!(session.refresh_notifications().await.unwrap(), 1);
    eventually(|| session.toasts().visible().len() == 1).await;

    let id = NotificationId::new("N1");
    assert!(session.toasts().dismiss(&id));
    assert_eq!(session.notifications().unread_count(), 0);
    eventually(|| api.called("notification.markAsRead:N1")).await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn task_subscription_joins_the_room_and_receives_live_comments() {
    let server = TestServer::start().await;
    let config = RealtimeConfig {
        ws_url: Some(server.url.clone()),
        ..RealtimeConfig::default()
    };
    let api = Arc::new(FakeApi::default());
    let session = RealtimeSession::new(&config, api);
    let mut status = session.connection().watch_status();

    let mut updates = session.subscribe_task(TaskId::new("T1"));
    assert!(session.login(UserId::new("u1")));
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;

    // Subscribed before the channel opened, so the join goes out on connect.
    let join: serde_json::Value = serde_json::from_str(&server.next_received().await).unwrap();
    assert_eq!(join["event"], "join-task");
    assert_eq!(join["data"]["taskId"], "T1");

    server.wait_accepted(1).await;
    server.push(
        &json!({
            "event": "comment-created",
            "data": { "taskId": "T1", "comment": comment("C9", "T1") },
        })
        .to_string(),
    );
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.event.kind(), EventKind::CommentCreated);
    assert!(session.comments().comment(&CommentId::new("C9")).is_some());

    drop(updates);
    let leave: serde_json::Value = serde_json::from_str(&server.next_received().await).unwrap();
    assert_eq!(leave["event"], "leave-task");
}
