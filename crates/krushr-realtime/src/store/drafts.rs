use std::time::Duration;

use krushr_proto::TaskId;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::CommentThreadStore;

/// Client-only composer buffer for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub last_saved_at: OffsetDateTime,
}

/// Periodically persists editor content into the draft buffer.
///
/// Content is written on each tick only if it differs from what was last
/// saved. Dropping the autosaver stops it without a final save; call
/// [`DraftAutosaver::flush`] first to keep pending text.
pub struct DraftAutosaver {
    task: TaskId,
    store: CommentThreadStore,
    content: watch::Sender<String>,
    handle: JoinHandle<()>,
}

impl DraftAutosaver {
    pub fn spawn(store: CommentThreadStore, task: TaskId, interval: Duration) -> Self {
        let initial = store.draft(&task).unwrap_or_default();
        let (content, rx) = watch::channel(initial.clone());
        let handle = tokio::spawn(autosave(store.clone(), task.clone(), interval, rx, initial));
        Self {
            task,
            store,
            content,
            handle,
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    /// Records the editor's current text; it is saved on the next tick.
    pub fn update(&self, content: impl Into<String>) {
        self.content.send_replace(content.into());
    }

    /// Saves the pending text now.
    pub fn flush(&self) {
        let current = self.content.borrow().clone();
        self.store.save_draft(&self.task, current);
    }
}

impl Drop for DraftAutosaver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn autosave(
    store: CommentThreadStore,
    task: TaskId,
    interval: Duration,
    mut rx: watch::Receiver<String>,
    mut last_saved: String,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match rx.has_changed() {
            Ok(false) => continue,
            Ok(true) => {}
            Err(_) => return,
        }
        let current = rx.borrow_and_update().clone();
        if current != last_saved {
            store.save_draft(&task, current.clone());
            last_saved = current;
        }
    }
}
