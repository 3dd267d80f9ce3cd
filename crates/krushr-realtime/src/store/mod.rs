//! Client-side caches fed by the dispatcher and the optimistic coordinators.
//!
//! Every store is a cheap `Clone` handle over shared state. Locks are held
//! only for the duration of a single synchronous mutation and never across
//! an `.await`.

/// Sets each listed field of `current` back to its value in `base`, but only
/// where it still equals the value in `applied`.
macro_rules! revert_fields {
    ($current:expr, $base:expr, $applied:expr; $($field:ident),+ $(,)?) => {
        $(
            if $current.$field == $applied.$field {
                $current.$field = $base.$field;
            }
        )+
    };
}

mod comments;
mod drafts;
mod notifications;
mod presence;
mod tasks;

pub use comments::{aggregate_reactions, CommentThread, CommentThreadStore, ReactionSummary, SortOrder};
pub use drafts::{Draft, DraftAutosaver};
pub use notifications::NotificationStore;
pub use presence::PresenceStore;
pub use tasks::TaskStore;
