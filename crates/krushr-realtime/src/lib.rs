//! Realtime synchronization core for Krushr clients.
//!
//! A [`RealtimeSession`] wires together the socket supervisor
//! ([`ConnectionManager`]), the in-order [`EventDispatcher`], the client-side
//! stores, the optimistic mutation coordinators and the notification toast
//! queue. Everything is an explicitly constructed value; nothing here is a
//! process global except the logging subscriber.

pub mod ai;
pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod optimistic;
pub mod rpc;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod toasts;

pub use ai::AiRealtime;
pub use bus::{ResourceBus, ResourceUpdate, Subscription, Topic};
pub use config::{ConfigError, RealtimeConfig};
pub use connection::{ConnectionManager, ConnectionStatus, ReconnectPolicy};
pub use dispatch::EventDispatcher;
pub use error::{CommentStoreError, MutationError, RpcError};
pub use optimistic::{MutationFailure, MutationKind, OptimisticCoordinator, ReactionToggles};
pub use rpc::{HttpApi, RealtimeApi};
pub use session::RealtimeSession;
pub use store::{
    CommentThread, CommentThreadStore, DraftAutosaver, NotificationStore, PresenceStore,
    ReactionSummary, SortOrder, TaskStore,
};
pub use toasts::{DismissReason, Toast, ToastEvent, ToastQueue};
