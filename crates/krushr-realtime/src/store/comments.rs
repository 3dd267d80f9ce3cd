use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use krushr_proto::{
    Comment, CommentId, CommentPatch, Reaction, ReactionId, ReactionToggle, TaskId, UserId,
};
use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::error::CommentStoreError;
use crate::store::drafts::Draft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A top-level comment with every reply that descends from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<UserId>,
    pub reacted_by_current_user: bool,
}

#[derive(Default)]
struct CommentState {
    by_task: HashMap<TaskId, Vec<Comment>>,
    loading: HashSet<TaskId>,
    last_updated: HashMap<TaskId, OffsetDateTime>,
    drafts: HashMap<TaskId, Draft>,
}

impl CommentState {
    fn find_mut(&mut self, id: &CommentId) -> Option<&mut Comment> {
        self.by_task
            .values_mut()
            .flat_map(|comments| comments.iter_mut())
            .find(|c| &c.id == id)
    }

    fn find(&self, id: &CommentId) -> Option<&Comment> {
        self.by_task
            .values()
            .flat_map(|comments| comments.iter())
            .find(|c| &c.id == id)
    }

    fn live_mut(&mut self, id: &CommentId) -> Result<&mut Comment, CommentStoreError> {
        match self.find_mut(id) {
            None => Err(CommentStoreError::NotFound(id.clone())),
            Some(c) if c.is_deleted => Err(CommentStoreError::Deleted(id.clone())),
            Some(c) => Ok(c),
        }
    }

    fn stamp(&mut self, task: &TaskId) {
        self.last_updated
            .insert(task.clone(), OffsetDateTime::now_utc());
    }
}

/// Normalized comment cache keyed by owning task, plus per-task loading
/// flags, update stamps and draft buffers.
#[derive(Clone, Default)]
pub struct CommentThreadStore {
    state: Arc<RwLock<CommentState>>,
}

impl CommentThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comments(&self, task: &TaskId, comments: Vec<Comment>) {
        let mut state = self.state.write();
        state.by_task.insert(task.clone(), comments);
        state.stamp(task);
    }

    /// Appends to the owning task's list. A comment whose id is already
    /// cached replaces the cached record instead.
    pub fn add_comment(&self, comment: Comment) {
        let mut state = self.state.write();
        let task = comment.task_id.clone();
        let comments = state.by_task.entry(task.clone()).or_default();
        match comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) => *existing = comment,
            None => comments.push(comment),
        }
        state.stamp(&task);
    }

    /// Applies `patch` wherever the comment lives and marks it edited.
    pub fn update_comment(
        &self,
        id: &CommentId,
        patch: &CommentPatch,
    ) -> Result<Comment, CommentStoreError> {
        let mut state = self.state.write();
        let comment = state.live_mut(id)?;
        comment.apply(patch);
        comment.is_edited = true;
        let updated = comment.clone();
        state.stamp(&updated.task_id);
        Ok(updated)
    }

    /// Soft delete. Returns the record as it was before deletion.
    pub fn delete_comment(&self, id: &CommentId) -> Result<Comment, CommentStoreError> {
        let mut state = self.state.write();
        let comment = state.live_mut(id)?;
        let before = comment.clone();
        comment.is_deleted = true;
        state.stamp(&before.task_id);
        Ok(before)
    }

    /// Hard removal, used only for optimistic placeholders.
    pub fn remove_comment(&self, id: &CommentId) -> Option<Comment> {
        let mut state = self.state.write();
        for comments in state.by_task.values_mut() {
            if let Some(pos) = comments.iter().position(|c| &c.id == id) {
                return Some(comments.remove(pos));
            }
        }
        None
    }

    /// Undoes a local edit or soft delete. Each edited field that still
    /// holds the value written in `applied` goes back to `base`; fields
    /// changed since by the server or a peer stay as they are, and reactions
    /// are never touched. A comment that vanished in the meantime stays gone.
    pub fn revert_comment(&self, base: Comment, applied: &Comment) {
        let mut state = self.state.write();
        let Some(current) = state.find_mut(&base.id) else {
            return;
        };
        revert_fields!(current, base, applied;
            content,
            plain_text,
            mentions,
            attachments,
            is_edited,
            is_deleted,
            updated_at,
        );
        let task = current.task_id.clone();
        state.stamp(&task);
    }

    /// Merges an authoritative server copy of an edited comment.
    pub fn merge_server_comment(&self, server: &Comment) {
        let missing = {
            let mut state = self.state.write();
            match state.find_mut(&server.id) {
                Some(existing) => {
                    if !existing.is_deleted {
                        existing.apply(&CommentPatch::from_server(server));
                        existing.is_edited = existing.is_edited || server.is_edited;
                        if let Some(reactions) = &server.reactions {
                            existing.reactions = Some(reactions.clone());
                        }
                    }
                    false
                }
                None => true,
            }
        };
        if missing {
            self.add_comment(server.clone());
        }
    }

    pub fn comment(&self, id: &CommentId) -> Option<Comment> {
        self.state.read().find(id).cloned()
    }

    pub fn comments(&self, task: &TaskId) -> Vec<Comment> {
        self.state
            .read()
            .by_task
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    /// Includes soft-deleted comments.
    pub fn comment_count(&self, task: &TaskId) -> usize {
        self.state
            .read()
            .by_task
            .get(task)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Adds a reaction. Repeats of a known reaction id or of an existing
    /// `(user, emoji)` pair are ignored. Returns whether anything changed.
    pub fn add_reaction(&self, reaction: Reaction) -> bool {
        let mut state = self.state.write();
        let Ok(comment) = state.live_mut(&reaction.comment_id) else {
            return false;
        };
        let duplicate = comment.reactions().iter().any(|r| {
            r.id == reaction.id || (r.user_id == reaction.user_id && r.emoji == reaction.emoji)
        });
        if duplicate {
            return false;
        }
        comment.reactions_mut().push(reaction);
        true
    }

    pub fn remove_reaction(
        &self,
        comment_id: &CommentId,
        reaction_id: &ReactionId,
    ) -> Option<Reaction> {
        let mut state = self.state.write();
        let comment = state.find_mut(comment_id)?;
        let pos = comment.reactions().iter().position(|r| &r.id == reaction_id)?;
        Some(comment.reactions_mut().remove(pos))
    }

    /// Removes the user's `emoji` reaction if present, otherwise adds one
    /// under a temporary id.
    pub fn toggle_reaction(
        &self,
        comment_id: &CommentId,
        user: &UserId,
        emoji: &str,
    ) -> Result<ReactionToggle, CommentStoreError> {
        let mut state = self.state.write();
        let comment = state.live_mut(comment_id)?;
        if let Some(pos) = comment
            .reactions()
            .iter()
            .position(|r| &r.user_id == user && r.emoji == emoji)
        {
            let removed = comment.reactions_mut().remove(pos);
            return Ok(ReactionToggle::Removed {
                reaction_id: removed.id,
            });
        }
        let reaction = Reaction {
            id: ReactionId::temporary(),
            comment_id: comment_id.clone(),
            user_id: user.clone(),
            emoji: emoji.to_string(),
            created_at: OffsetDateTime::now_utc(),
            user: None,
        };
        comment.reactions_mut().push(reaction.clone());
        Ok(ReactionToggle::Added { reaction })
    }

    /// Forces the `(user, emoji)` slot on a comment to `reaction`, or clears
    /// it when `None`. Reactions of other users or emoji are left alone.
    pub fn settle_reaction(
        &self,
        comment_id: &CommentId,
        user: &UserId,
        emoji: &str,
        reaction: Option<Reaction>,
    ) {
        let mut state = self.state.write();
        let Some(comment) = state.find_mut(comment_id) else {
            return;
        };
        let reactions = comment.reactions_mut();
        reactions.retain(|r| !(&r.user_id == user && r.emoji == emoji));
        if let Some(reaction) = reaction {
            reactions.push(reaction);
        }
    }

    pub fn aggregate_reactions(
        &self,
        comment_id: &CommentId,
        current_user: &UserId,
    ) -> Vec<ReactionSummary> {
        self.state
            .read()
            .find(comment_id)
            .map(|c| aggregate_reactions(c.reactions(), current_user))
            .unwrap_or_default()
    }

    /// Derives the threaded view. Replies are attached to their top-level
    /// ancestor in ascending `created_at` order; replies whose ancestry never
    /// reaches a top-level comment of this task are left out.
    pub fn threaded_comments(&self, task: &TaskId, order: SortOrder) -> Vec<CommentThread> {
        let state = self.state.read();
        let Some(comments) = state.by_task.get(task) else {
            return Vec::new();
        };
        build_threads(comments, order)
    }

    pub fn set_loading(&self, task: &TaskId, loading: bool) {
        let mut state = self.state.write();
        if loading {
            state.loading.insert(task.clone());
        } else {
            state.loading.remove(task);
        }
    }

    pub fn is_loading(&self, task: &TaskId) -> bool {
        self.state.read().loading.contains(task)
    }

    pub fn mark_updated(&self, task: &TaskId) {
        self.state.write().stamp(task);
    }

    pub fn last_updated(&self, task: &TaskId) -> Option<OffsetDateTime> {
        self.state.read().last_updated.get(task).copied()
    }

    pub fn save_draft(&self, task: &TaskId, content: impl Into<String>) {
        self.state.write().drafts.insert(
            task.clone(),
            Draft {
                content: content.into(),
                last_saved_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// The saved draft text; an empty draft reads as absent.
    pub fn draft(&self, task: &TaskId) -> Option<String> {
        self.state
            .read()
            .drafts
            .get(task)
            .filter(|d| !d.content.is_empty())
            .map(|d| d.content.clone())
    }

    pub fn draft_record(&self, task: &TaskId) -> Option<Draft> {
        self.state.read().drafts.get(task).cloned()
    }

    pub fn clear_draft(&self, task: &TaskId) {
        self.state.write().drafts.remove(task);
    }
}

/// Groups by emoji in first-seen order.
pub fn aggregate_reactions(reactions: &[Reaction], current_user: &UserId) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for reaction in reactions {
        let idx = match summaries.iter().position(|s| s.emoji == reaction.emoji) {
            Some(idx) => idx,
            None => {
                summaries.push(ReactionSummary {
                    emoji: reaction.emoji.clone(),
                    count: 0,
                    users: Vec::new(),
                    reacted_by_current_user: false,
                });
                summaries.len() - 1
            }
        };
        let summary = &mut summaries[idx];
        summary.count += 1;
        summary.users.push(reaction.user_id.clone());
        if &reaction.user_id == current_user {
            summary.reacted_by_current_user = true;
        }
    }
    summaries
}

fn build_threads(comments: &[Comment], order: SortOrder) -> Vec<CommentThread> {
    let by_id: HashMap<&CommentId, &Comment> = comments.iter().map(|c| (&c.id, c)).collect();

    let mut roots: Vec<&Comment> = comments.iter().filter(|c| c.parent_id.is_none()).collect();
    roots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    if order == SortOrder::Descending {
        roots.reverse();
    }

    let mut replies: HashMap<&CommentId, Vec<&Comment>> = HashMap::new();
    for comment in comments.iter().filter(|c| c.parent_id.is_some()) {
        if let Some(root) = resolve_root(comment, &by_id) {
            replies.entry(root).or_default().push(comment);
        }
    }

    roots
        .into_iter()
        .map(|root| {
            let mut children = replies.remove(&root.id).unwrap_or_default();
            children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            CommentThread {
                comment: root.clone(),
                replies: children.into_iter().cloned().collect(),
            }
        })
        .collect()
}

fn resolve_root<'a>(
    comment: &'a Comment,
    by_id: &HashMap<&'a CommentId, &'a Comment>,
) -> Option<&'a CommentId> {
    let mut seen: HashSet<&CommentId> = HashSet::new();
    let mut current = comment;
    while let Some(parent_id) = current.parent_id.as_ref() {
        if !seen.insert(&current.id) {
            return None;
        }
        current = by_id.get(parent_id).copied()?;
    }
    Some(&current.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn comment(id: &str, parent: Option<&str>, at: OffsetDateTime) -> Comment {
        Comment {
            id: CommentId::new(id),
            task_id: TaskId::new("T1"),
            author_id: UserId::new("u1"),
            parent_id: parent.map(CommentId::new),
            content: format!("<p>{id}</p>"),
            plain_text: None,
            is_edited: false,
            is_deleted: false,
            created_at: at,
            updated_at: at,
            author: None,
            mentions: vec![],
            reactions: Some(vec![]),
            attachments: vec![],
        }
    }

    fn reaction(id: &str, comment: &str, user: &str, emoji: &str) -> Reaction {
        Reaction {
            id: ReactionId::new(id),
            comment_id: CommentId::new(comment),
            user_id: UserId::new(user),
            emoji: emoji.into(),
            created_at: datetime!(2024-05-01 10:07 UTC),
            user: None,
        }
    }

    fn t1() -> TaskId {
        TaskId::new("T1")
    }

    fn seeded() -> CommentThreadStore {
        let store = CommentThreadStore::new();
        store.set_comments(
            &t1(),
            vec![
                comment("C1", None, datetime!(2024-05-01 10:00 UTC)),
                comment("C2", Some("C1"), datetime!(2024-05-01 10:05 UTC)),
            ],
        );
        store
    }

    #[test]
    fn reply_nests_under_parent_and_survives_parent_deletion() {
        let store = seeded();
        let threads = store.threaded_comments(&t1(), SortOrder::Ascending);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.id, CommentId::new("C1"));
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].id, CommentId::new("C2"));

        store.delete_comment(&CommentId::new("C1")).unwrap();
        let threads = store.threaded_comments(&t1(), SortOrder::Ascending);
        assert!(threads[0].comment.is_deleted);
        assert_eq!(threads[0].replies[0].id, CommentId::new("C2"));
        assert_eq!(store.comment_count(&t1()), 2);
    }

    #[test]
    fn threaded_view_is_stable_and_each_reply_appears_once() {
        let store = seeded();
        store.add_comment(comment("C3", None, datetime!(2024-05-01 09:00 UTC)));
        store.add_comment(comment("C4", Some("C3"), datetime!(2024-05-01 11:00 UTC)));
        store.add_comment(comment("C5", Some("C3"), datetime!(2024-05-01 09:30 UTC)));

        let first = store.threaded_comments(&t1(), SortOrder::Ascending);
        let second = store.threaded_comments(&t1(), SortOrder::Ascending);
        assert_eq!(first, second);

        let top: Vec<_> = first.iter().map(|t| t.comment.id.as_str()).collect();
        assert_eq!(top, vec!["C3", "C1"]);
        let replies: Vec<_> = first[0].replies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(replies, vec!["C5", "C4"]);

        let all_replies: Vec<_> = first
            .iter()
            .flat_map(|t| t.replies.iter().map(|c| c.id.clone()))
            .collect();
        let unique: HashSet<_> = all_replies.iter().collect();
        assert_eq!(all_replies.len(), unique.len());
        assert!(top.iter().all(|id| *id != "C2" && *id != "C4" && *id != "C5"));
    }

    #[test]
    fn descending_order_flips_top_level_only() {
        let store = seeded();
        store.add_comment(comment("C3", None, datetime!(2024-05-01 12:00 UTC)));
        store.add_comment(comment("C6", Some("C1"), datetime!(2024-05-01 10:01 UTC)));
        let threads = store.threaded_comments(&t1(), SortOrder::Descending);
        let top: Vec<_> = threads.iter().map(|t| t.comment.id.as_str()).collect();
        assert_eq!(top, vec!["C3", "C1"]);
        let replies: Vec<_> = threads[1].replies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(replies, vec!["C6", "C2"]);
    }

    #[test]
    fn deeper_replies_flatten_under_top_level_ancestor() {
        let store = seeded();
        store.add_comment(comment("C7", Some("C2"), datetime!(2024-05-01 10:10 UTC)));
        let threads = store.threaded_comments(&t1(), SortOrder::Ascending);
        assert_eq!(threads.len(), 1);
        let replies: Vec<_> = threads[0].replies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(replies, vec!["C2", "C7"]);
    }

    #[test]
    fn orphans_and_cycles_are_hidden_but_counted() {
        let store = seeded();
        store.add_comment(comment("O1", Some("gone"), datetime!(2024-05-01 10:20 UTC)));
        store.add_comment(comment("X1", Some("X2"), datetime!(2024-05-01 10:30 UTC)));
        store.add_comment(comment("X2", Some("X1"), datetime!(2024-05-01 10:31 UTC)));
        let threads = store.threaded_comments(&t1(), SortOrder::Ascending);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(store.comment_count(&t1()), 5);
    }

    #[test]
    fn update_marks_edited_and_rejects_deleted() {
        let store = seeded();
        let updated = store
            .update_comment(&CommentId::new("C2"), &CommentPatch::content("edited"))
            .unwrap();
        assert!(updated.is_edited);
        assert_eq!(updated.content, "edited");

        store.delete_comment(&CommentId::new("C2")).unwrap();
        assert_eq!(
            store.update_comment(&CommentId::new("C2"), &CommentPatch::content("again")),
            Err(CommentStoreError::Deleted(CommentId::new("C2")))
        );
        assert_eq!(
            store.delete_comment(&CommentId::new("nope")),
            Err(CommentStoreError::NotFound(CommentId::new("nope")))
        );
    }

    #[test]
    fn soft_delete_keeps_count() {
        let store = seeded();
        let before = store.comment_count(&t1());
        store.delete_comment(&CommentId::new("C2")).unwrap();
        assert_eq!(store.comment_count(&t1()), before);
        assert!(!store.comment(&CommentId::new("C1")).unwrap().is_deleted);
    }

    #[test]
    fn toggling_twice_leaves_no_reaction() {
        let store = seeded();
        let c1 = CommentId::new("C1");
        let user = UserId::new("u9");
        let first = store.toggle_reaction(&c1, &user, "👍").unwrap();
        assert!(matches!(first, ReactionToggle::Added { .. }));
        let second = store.toggle_reaction(&c1, &user, "👍").unwrap();
        assert!(matches!(second, ReactionToggle::Removed { .. }));
        let remaining = store
            .comment(&c1)
            .unwrap()
            .reactions()
            .iter()
            .filter(|r| r.user_id == user && r.emoji == "👍")
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn inbound_reactions_are_idempotent() {
        let store = seeded();
        let reaction = Reaction {
            id: ReactionId::new("r1"),
            comment_id: CommentId::new("C1"),
            user_id: UserId::new("u2"),
            emoji: "🎉".into(),
            created_at: datetime!(2024-05-01 10:06 UTC),
            user: None,
        };
        assert!(store.add_reaction(reaction.clone()));
        assert!(!store.add_reaction(reaction.clone()));
        assert!(!store.add_reaction(Reaction {
            id: ReactionId::new("r2"),
            ..reaction
        }));
        assert!(store
            .remove_reaction(&CommentId::new("C1"), &ReactionId::new("r1"))
            .is_some());
        assert!(store.comment(&CommentId::new("C1")).unwrap().reactions().is_empty());
    }

    #[test]
    fn settled_reaction_replaces_temporary_one_only() {
        let store = seeded();
        let c1 = CommentId::new("C1");
        let user = UserId::new("u1");
        store.add_reaction(reaction("r-peer", "C1", "u2", "🔥"));
        store.toggle_reaction(&c1, &user, "🔥").unwrap();

        store.settle_reaction(&c1, &user, "🔥", Some(reaction("r-server", "C1", "u1", "🔥")));
        let ids: Vec<_> = store
            .comment(&c1)
            .unwrap()
            .reactions()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec![ReactionId::new("r-peer"), ReactionId::new("r-server")]);

        store.settle_reaction(&c1, &user, "🔥", None);
        let reactions = store.comment(&c1).unwrap().reactions.unwrap_or_default();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].user_id, UserId::new("u2"));
    }

    #[test]
    fn server_copy_replaces_reactions_only_when_it_carries_them() {
        let store = seeded();
        let c1 = CommentId::new("C1");
        store.add_reaction(reaction("r1", "C1", "u2", "🎉"));

        let mut server = store.comment(&c1).unwrap();
        server.content = "from server".into();
        server.reactions = None;
        store.merge_server_comment(&server);
        let merged = store.comment(&c1).unwrap();
        assert_eq!(merged.content, "from server");
        assert_eq!(merged.reactions().len(), 1);

        server.reactions = Some(Vec::new());
        store.merge_server_comment(&server);
        assert!(store.comment(&c1).unwrap().reactions().is_empty());
    }

    #[test]
    fn revert_restores_only_fields_still_holding_the_local_edit() {
        let store = seeded();
        let c1 = CommentId::new("C1");
        let base = store.comment(&c1).unwrap();
        let applied = store
            .update_comment(&c1, &CommentPatch::content("local edit"))
            .unwrap();
        store.add_reaction(reaction("r1", "C1", "u2", "🎉"));

        store.revert_comment(base.clone(), &applied);
        let reverted = store.comment(&c1).unwrap();
        assert_eq!(reverted.content, base.content);
        assert!(!reverted.is_edited);
        assert_eq!(reverted.reactions().len(), 1);

        // A peer rewrote the content after the local edit; theirs stays.
        let applied = store
            .update_comment(&c1, &CommentPatch::content("local edit"))
            .unwrap();
        store.merge_server_comment(&Comment {
            content: "peer edit".into(),
            ..applied.clone()
        });
        store.revert_comment(base, &applied);
        assert_eq!(store.comment(&c1).unwrap().content, "peer edit");
    }

    #[test]
    fn revert_of_a_soft_delete_undeletes() {
        let store = seeded();
        let c2 = CommentId::new("C2");
        let base = store.delete_comment(&c2).unwrap();
        let applied = store.comment(&c2).unwrap();
        store.revert_comment(base, &applied);
        assert!(!store.comment(&c2).unwrap().is_deleted);

        let gone = store.remove_comment(&c2).unwrap();
        store.revert_comment(gone.clone(), &gone);
        assert!(store.comment(&c2).is_none());
    }

    #[test]
    fn aggregation_groups_in_first_seen_order() {
        let at = datetime!(2024-05-01 10:00 UTC);
        let r = |id: &str, user: &str, emoji: &str| Reaction {
            id: ReactionId::new(id),
            comment_id: CommentId::new("C1"),
            user_id: UserId::new(user),
            emoji: emoji.into(),
            created_at: at,
            user: None,
        };
        let reactions = vec![r("1", "a", "👍"), r("2", "b", "🎉"), r("3", "me", "👍")];
        let summary = aggregate_reactions(&reactions, &UserId::new("me"));
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].emoji, "👍");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].users, vec![UserId::new("a"), UserId::new("me")]);
        assert!(summary[0].reacted_by_current_user);
        assert!(!summary[1].reacted_by_current_user);
    }

    #[test]
    fn drafts_are_isolated_per_task() {
        let store = CommentThreadStore::new();
        let a = TaskId::new("A");
        let b = TaskId::new("B");
        store.save_draft(&a, "x");
        store.save_draft(&b, "y");
        assert_eq!(store.draft(&a).as_deref(), Some("x"));
        assert_eq!(store.draft(&b).as_deref(), Some("y"));
        store.clear_draft(&a);
        assert_eq!(store.draft(&a), None);
        assert_eq!(store.draft(&b).as_deref(), Some("y"));
        store.save_draft(&b, "");
        assert_eq!(store.draft(&b), None);
        assert!(store.draft_record(&b).is_some());
    }

    #[test]
    fn loading_flags_and_stamps() {
        let store = CommentThreadStore::new();
        assert!(!store.is_loading(&t1()));
        store.set_loading(&t1(), true);
        assert!(store.is_loading(&t1()));
        store.set_loading(&t1(), false);
        assert!(!store.is_loading(&t1()));
        assert!(store.last_updated(&t1()).is_none());
        store.set_comments(&t1(), vec![]);
        assert!(store.last_updated(&t1()).is_some());

        let other = TaskId::new("T2");
        assert!(store.last_updated(&other).is_none());
        store.mark_updated(&other);
        assert!(store.last_updated(&other).is_some());
    }
}
