use std::time::Duration;

use krushr_proto::CommentId;
use thiserror::Error;

/// Failure of a call across the RPC boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("procedure `{procedure}` failed: {message}")]
    Procedure { procedure: String, message: String },
    #[error("invalid response from `{procedure}`: {source}")]
    Decode {
        procedure: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn procedure(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Procedure {
            procedure: procedure.into(),
            message: message.into(),
        }
    }
}

/// Why an optimistic mutation did not commit.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("superseded by a newer edit to the same entity")]
    Superseded,
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommentStoreError {
    #[error("comment {0} not found")]
    NotFound(CommentId),
    #[error("comment {0} is deleted")]
    Deleted(CommentId),
}

impl From<CommentStoreError> for MutationError {
    fn from(err: CommentStoreError) -> Self {
        match err {
            CommentStoreError::NotFound(id) => MutationError::NotFound {
                kind: "comment",
                id: id.to_string(),
            },
            CommentStoreError::Deleted(id) => {
                MutationError::Rejected(format!("comment {id} is deleted"))
            }
        }
    }
}
