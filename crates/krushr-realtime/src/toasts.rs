//! Bounded queue of toasts for unread notifications.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use krushr_proto::{Notification, NotificationId};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::store::NotificationStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub notification: Notification,
    pub shown_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    User,
    Expired,
    /// The notification was marked read elsewhere.
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed {
        notification_id: NotificationId,
        reason: DismissReason,
    },
}

#[derive(Default)]
struct ToastState {
    visible: Vec<Toast>,
    timers: HashMap<NotificationId, JoinHandle<()>>,
}

struct ToastInner {
    notifications: NotificationStore,
    limit: usize,
    ttl: Duration,
    state: Mutex<ToastState>,
    events: broadcast::Sender<ToastEvent>,
}

/// Shows at most `limit` unread notifications at once, each for `ttl`.
///
/// Notifications past the limit wait their turn. Dismissing a toast, by the
/// user or by expiry, marks its notification read.
#[derive(Clone)]
pub struct ToastQueue {
    inner: Arc<ToastInner>,
}

impl ToastQueue {
    pub fn new(notifications: NotificationStore, limit: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ToastInner {
                notifications,
                limit,
                ttl,
                state: Mutex::new(ToastState::default()),
                events: broadcast::channel(64).0,
            }),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ToastEvent> {
        self.inner.events.subscribe()
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.inner.state.lock().visible.clone()
    }

    /// Re-syncs whenever the notification store changes.
    pub fn spawn(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut revisions = self.inner.notifications.subscribe();
        tokio::spawn(async move {
            queue.sync();
            while revisions.changed().await.is_ok() {
                queue.sync();
            }
        })
    }

    /// Drops toasts whose notification is no longer unread and fills free
    /// slots from the unread set.
    pub fn sync(&self) {
        let unread = self.inner.notifications.unread();
        let mut shown = Vec::new();
        let mut hidden = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let ToastState { visible, timers } = &mut *state;
            visible.retain(|toast| {
                let still_unread = unread.iter().any(|n| n.id == toast.notification.id);
                if !still_unread {
                    if let Some(timer) = timers.remove(&toast.notification.id) {
                        timer.abort();
                    }
                    hidden.push(toast.notification.id.clone());
                }
                still_unread
            });
            for notification in unread {
                if visible.len() >= self.inner.limit {
                    break;
                }
                if visible.iter().any(|t| t.notification.id == notification.id) {
                    continue;
                }
                let id = notification.id.clone();
                let toast = Toast {
                    notification,
                    shown_at: Instant::now(),
                };
                visible.push(toast.clone());
                timers.insert(id.clone(), self.schedule_expiry(id));
                shown.push(toast);
            }
        }
        for id in hidden {
            self.emit(ToastEvent::Dismissed {
                notification_id: id,
                reason: DismissReason::Read,
            });
        }
        for toast in shown {
            trace!(target: "realtime::toasts", id = %toast.notification.id, "toast shown");
            self.emit(ToastEvent::Shown(toast));
        }
    }

    /// User dismissal. Marks the notification read even if no toast is
    /// visible for it.
    pub fn dismiss(&self, id: &NotificationId) -> bool {
        self.dismiss_with(id, DismissReason::User)
    }

    fn dismiss_with(&self, id: &NotificationId, reason: DismissReason) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timers.remove(id) {
                if reason != DismissReason::Expired {
                    timer.abort();
                }
            }
            let before = state.visible.len();
            state.visible.retain(|t| &t.notification.id != id);
            state.visible.len() != before
        };
        if removed {
            debug!(target: "realtime::toasts", id = %id, ?reason, "toast dismissed");
            self.emit(ToastEvent::Dismissed {
                notification_id: id.clone(),
                reason,
            });
        }
        self.inner.notifications.mark_read(id);
        self.sync();
        removed
    }

    fn schedule_expiry(&self, id: NotificationId) -> JoinHandle<()> {
        let weak: Weak<ToastInner> = Arc::downgrade(&self.inner);
        let ttl = self.inner.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = weak.upgrade() {
                ToastQueue { inner }.dismiss_with(&id, DismissReason::Expired);
            }
        })
    }

    fn emit(&self, event: ToastEvent) {
        let _ = self.inner.events.send(event);
    }
}
