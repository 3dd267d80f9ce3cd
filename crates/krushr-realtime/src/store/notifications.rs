use std::sync::Arc;

use krushr_proto::{Notification, NotificationId};
use parking_lot::RwLock;
use tokio::sync::watch;

struct NotificationInner {
    items: RwLock<Vec<Notification>>,
    revision: watch::Sender<u64>,
}

/// Notifications, newest first. Every change bumps a revision observers can
/// wait on.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<NotificationInner>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(NotificationInner {
                items: RwLock::new(Vec::new()),
                revision,
            }),
        }
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    pub fn set_all(&self, notifications: Vec<Notification>) {
        *self.inner.items.write() = notifications;
        self.bump();
    }

    /// Prepends a new notification. A repeat of a known id replaces it in place.
    pub fn push(&self, notification: Notification) {
        {
            let mut items = self.inner.items.write();
            match items.iter_mut().find(|n| n.id == notification.id) {
                Some(existing) => *existing = notification,
                None => items.insert(0, notification),
            }
        }
        self.bump();
    }

    /// Returns whether the notification went from unread to read.
    pub fn mark_read(&self, id: &NotificationId) -> bool {
        let changed = {
            let mut items = self.inner.items.write();
            match items.iter_mut().find(|n| &n.id == id) {
                Some(n) if !n.is_read => {
                    n.is_read = true;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.bump();
        }
        changed
    }

    pub fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.inner.items.read().iter().find(|n| &n.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.inner.items.read().clone()
    }

    pub fn unread(&self) -> Vec<Notification> {
        self.inner
            .items
            .read()
            .iter()
            .filter(|n| !n.is_read)
            .cloned()
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.items.read().iter().filter(|n| !n.is_read).count()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn notification(id: &str) -> Notification {
        Notification {
            id: NotificationId::new(id),
            kind: "mention".into(),
            title: format!("title {id}"),
            message: String::new(),
            is_read: false,
            sender: None,
            created_at: datetime!(2024-05-01 10:00 UTC),
        }
    }

    #[test]
    fn push_prepends_and_dedupes() {
        let store = NotificationStore::new();
        store.push(notification("n1"));
        store.push(notification("n2"));
        store.push(notification("n1"));
        let ids: Vec<_> = store.all().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NotificationId::new("n2"), NotificationId::new("n1")]);
    }

    #[test]
    fn mark_read_is_idempotent_and_bumps_revision_once() {
        let store = NotificationStore::new();
        let rx = store.subscribe();
        store.push(notification("n1"));
        let after_push = *rx.borrow();
        assert!(store.mark_read(&NotificationId::new("n1")));
        assert!(!store.mark_read(&NotificationId::new("n1")));
        assert_eq!(*rx.borrow(), after_push + 1);
        assert_eq!(store.unread_count(), 0);
    }
}
