use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by ids minted on the client for optimistic creates.
pub const TEMP_ID_PREFIX: &str = "temp-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Placeholder id used until the server assigns the real one.
            pub fn temporary() -> Self {
                Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
            }

            pub fn is_temporary(&self) -> bool {
                self.0.starts_with(TEMP_ID_PREFIX)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(TaskId);
string_id!(KanbanId);
string_id!(CommentId);
string_id!(ReactionId);
string_id!(NotificationId);
string_id!(UserId);
string_id!(WorkspaceId);
string_id!(
    /// AI or chat conversation the event belongs to.
    ConversationId
);
