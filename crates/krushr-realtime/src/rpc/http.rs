use async_trait::async_trait;
use krushr_proto::{
    Comment, CommentId, CommentPatch, NewComment, NewTask, Notification, NotificationId,
    ReactionToggle, Task, TaskId, TaskPatch,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::RpcError;
use crate::rpc::RealtimeApi;

/// tRPC-over-HTTP client. Queries are `GET {base}/{procedure}?input=<json>`,
/// mutations `POST {base}/{procedure}` with the input as the JSON body.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Result { result: ResultBody },
    Error { error: ErrorBody },
}

#[derive(Deserialize)]
struct ResultBody {
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/{}", self.base_url, procedure)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn query<I, T>(&self, procedure: &str, input: &I) -> Result<T, RpcError>
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let input = serde_json::to_string(input).map_err(|source| RpcError::Decode {
            procedure: procedure.to_string(),
            source,
        })?;
        let request = self
            .http
            .get(self.url(procedure))
            .query(&[("input", input.as_str())]);
        self.execute(procedure, self.authorize(request)).await
    }

    pub async fn mutate<I, T>(&self, procedure: &str, input: &I) -> Result<T, RpcError>
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.http.post(self.url(procedure)).json(input);
        self.execute(procedure, self.authorize(request)).await
    }

    async fn execute<T>(&self, procedure: &str, request: RequestBuilder) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
    {
        debug!(target: "realtime::rpc", procedure, "calling");
        let res = request.send().await?;
        let status = res.status();
        let body = res.text().await?;
        decode_response(procedure, status, &body)
    }
}

fn decode_response<T: DeserializeOwned>(
    procedure: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<T, RpcError> {
    let decode_err = |source: serde_json::Error| RpcError::Decode {
        procedure: procedure.to_string(),
        source,
    };
    match (serde_json::from_str::<Envelope>(body), status.is_success()) {
        (Ok(Envelope::Error { error }), _) => Err(RpcError::procedure(procedure, error.message)),
        (Ok(Envelope::Result { result }), true) => {
            serde_json::from_value(result.data).map_err(decode_err)
        }
        (Err(source), true) => Err(decode_err(source)),
        (_, false) => Err(RpcError::UnexpectedStatus {
            status,
            body: body.to_string(),
        }),
    }
}

#[async_trait]
impl RealtimeApi for HttpApi {
    async fn create_task(&self, input: &NewTask) -> Result<Task, RpcError> {
        self.mutate("task.create", input).await
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, RpcError> {
        let mut input = serde_json::to_value(patch).map_err(|source| RpcError::Decode {
            procedure: "task.update".into(),
            source,
        })?;
        input["id"] = json!(id);
        self.mutate("task.update", &input).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), RpcError> {
        let _: Value = self.mutate("task.delete", &json!({ "id": id })).await?;
        Ok(())
    }

    async fn list_comments(&self, task: &TaskId) -> Result<Vec<Comment>, RpcError> {
        self.query("comment.list", &json!({ "taskId": task })).await
    }

    async fn create_comment(&self, input: &NewComment) -> Result<Comment, RpcError> {
        self.mutate("comment.create", input).await
    }

    async fn update_comment(
        &self,
        id: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, RpcError> {
        let mut input = serde_json::to_value(patch).map_err(|source| RpcError::Decode {
            procedure: "comment.update".into(),
            source,
        })?;
        input["id"] = json!(id);
        self.mutate("comment.update", &input).await
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<(), RpcError> {
        let _: Value = self.mutate("comment.delete", &json!({ "id": id })).await?;
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        comment: &CommentId,
        emoji: &str,
    ) -> Result<ReactionToggle, RpcError> {
        self.mutate(
            "comment.toggleReaction",
            &json!({ "commentId": comment, "emoji": emoji }),
        )
        .await
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>, RpcError> {
        self.query("notification.list", &json!({})).await
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), RpcError> {
        let _: Value = self
            .mutate("notification.markAsRead", &json!({ "id": id }))
            .await?;
        Ok(())
    }
}
