//! Request/response boundary with the Krushr API.

mod http;

pub use http::HttpApi;

use async_trait::async_trait;
use krushr_proto::{
    Comment, CommentId, CommentPatch, NewComment, NewTask, Notification, NotificationId,
    ReactionToggle, Task, TaskId, TaskPatch,
};

use crate::error::RpcError;

/// Remote procedures the realtime core depends on.
#[async_trait]
pub trait RealtimeApi: Send + Sync {
    async fn create_task(&self, input: &NewTask) -> Result<Task, RpcError>;
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, RpcError>;
    async fn delete_task(&self, id: &TaskId) -> Result<(), RpcError>;

    async fn list_comments(&self, task: &TaskId) -> Result<Vec<Comment>, RpcError>;
    async fn create_comment(&self, input: &NewComment) -> Result<Comment, RpcError>;
    async fn update_comment(
        &self,
        id: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RpcError>;
    async fn delete_comment(&self, id: &CommentId) -> Result<(), RpcError>;
    async fn toggle_reaction(
        &self,
        comment: &CommentId,
        emoji: &str,
    ) -> Result<ReactionToggle, RpcError>;

    async fn list_notifications(&self) -> Result<Vec<Notification>, RpcError>;
    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), RpcError>;
}
