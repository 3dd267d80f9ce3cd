use std::collections::HashMap;
use std::sync::Arc;

use krushr_proto::{Kanban, KanbanId, Task, TaskId, TaskUpdate};
use parking_lot::RwLock;

#[derive(Default)]
struct TaskState {
    tasks: HashMap<TaskId, Task>,
    kanbans: HashMap<KanbanId, Kanban>,
}

/// Tasks and boards keyed by id.
#[derive(Clone, Default)]
pub struct TaskStore {
    state: Arc<RwLock<TaskState>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        let mut state = self.state.write();
        state.tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
    }

    pub fn upsert(&self, task: Task) {
        self.state.write().tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.read().tasks.get(id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.state.read().tasks.contains_key(id)
    }

    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        self.state.write().tasks.remove(id)
    }

    /// Merges an inbound partial update. Unknown tasks are ignored since a
    /// patch alone cannot materialize one.
    pub fn apply_update(&self, update: &TaskUpdate) -> bool {
        match self.state.write().tasks.get_mut(&update.id) {
            Some(task) => {
                task.apply(&update.patch);
                true
            }
            None => false,
        }
    }

    /// Undoes a local change. `applied` is the task as the change left it,
    /// or `None` if the change removed it. Only fields still holding the
    /// locally written value go back to `base`, so concurrent updates from
    /// the server survive.
    pub fn revert(&self, base: Task, applied: Option<&Task>) {
        let mut state = self.state.write();
        let Some(applied) = applied else {
            state.tasks.entry(base.id.clone()).or_insert(base);
            return;
        };
        // A task deleted by someone else in the meantime stays gone.
        if let Some(current) = state.tasks.get_mut(&base.id) {
            revert_fields!(current, base, applied;
                title,
                description,
                status,
                priority,
                kanban_column_id,
                position,
                assignee_id,
                due_date,
                tags,
                updated_at,
            );
        }
    }

    /// Ordered by board position, then creation time.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert_kanban(&self, kanban: Kanban) {
        self.state.write().kanbans.insert(kanban.id.clone(), kanban);
    }

    pub fn kanban(&self, id: &KanbanId) -> Option<Kanban> {
        self.state.read().kanbans.get(id).cloned()
    }
}
