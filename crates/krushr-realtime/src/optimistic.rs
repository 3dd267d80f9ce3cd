//! Optimistic mutations: apply locally, call the server, then commit or roll
//! back.
//!
//! Each coordinator tracks at most one in-flight mutation per entity id. A
//! newer mutation on the same id supersedes the older one: the older
//! mutation's eventual outcome never touches the store. Only the newest
//! mutation reconciles. On failure it reverts the fields the local changes
//! wrote, back to the last state known to match the server, and leaves
//! anything the server or peers changed in the meantime alone.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use krushr_proto::{
    ClientEvent, Comment, CommentId, CommentPayload, CommentRef, Reaction, ReactionToggle, Task,
    TaskId, UserId,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{MutationError, RpcError};
use crate::store::{CommentThreadStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        })
    }
}

/// Published for every mutation that failed and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub entity: &'static str,
    pub id: String,
    pub kind: MutationKind,
    pub message: String,
}

/// A store the coordinator can apply and undo mutations against.
pub trait MutationTarget: Send + Sync {
    type Id: Clone + Eq + Hash + fmt::Display + Send + Sync;
    type Entity: Clone + Send + Sync;

    const ENTITY: &'static str;

    fn entity_id(entity: &Self::Entity) -> Self::Id;
    fn is_temporary(id: &Self::Id) -> bool;

    fn snapshot(&self, id: &Self::Id) -> Option<Self::Entity>;
    fn insert(&self, entity: Self::Entity);
    fn remove(&self, id: &Self::Id);
    /// Undoes a local change. `applied` is the entity as the change left it,
    /// `None` if the change removed it.
    fn revert(&self, base: Self::Entity, applied: Option<&Self::Entity>);
    /// Folds the server's copy into the local one.
    fn reconcile(&self, server: &Self::Entity);

    /// Event broadcast to peers after a commit, if any.
    fn peer_event(&self, kind: MutationKind, entity: &Self::Entity) -> Option<ClientEvent>;
}

struct InFlight<E> {
    version: u64,
    /// Last state known to match the server.
    base: Option<E>,
    /// State right after the newest local apply.
    applied: Option<E>,
}

pub struct OptimisticCoordinator<T: MutationTarget> {
    target: T,
    inflight: Mutex<HashMap<T::Id, InFlight<T::Entity>>>,
    next_version: AtomicU64,
    timeout: Duration,
    failures: broadcast::Sender<MutationFailure>,
    peers: Option<ConnectionManager>,
}

impl<T: MutationTarget> OptimisticCoordinator<T> {
    pub fn new(target: T, timeout: Duration, failures: broadcast::Sender<MutationFailure>) -> Self {
        Self {
            target,
            inflight: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            timeout,
            failures,
            peers: None,
        }
    }

    /// Commits are announced to peers over this connection.
    pub fn with_peers(mut self, connection: ConnectionManager) -> Self {
        self.peers = Some(connection);
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn in_flight(&self, id: &T::Id) -> bool {
        self.inflight.lock().contains_key(id)
    }

    /// Inserts `placeholder` (carrying a temporary id) right away, then swaps
    /// it for the server's entity, or removes it if the call fails.
    pub async fn create<Fut>(
        &self,
        placeholder: T::Entity,
        remote: Fut,
    ) -> Result<T::Entity, MutationError>
    where
        Fut: Future<Output = Result<T::Entity, RpcError>>,
    {
        let temp_id = T::entity_id(&placeholder);
        {
            let mut inflight = self.inflight.lock();
            self.target.insert(placeholder);
            let version = self.next_version();
            inflight.insert(
                temp_id.clone(),
                InFlight {
                    version,
                    base: None,
                    applied: None,
                },
            );
        }
        debug!(target: "realtime::optimistic", entity = T::ENTITY, id = %temp_id, "optimistic create applied");

        let outcome = self.call(remote).await;
        self.inflight.lock().remove(&temp_id);
        self.target.remove(&temp_id);
        match outcome {
            Ok(server) => {
                self.target.insert(server.clone());
                info!(
                    target: "realtime::optimistic",
                    entity = T::ENTITY,
                    temp_id = %temp_id,
                    id = %T::entity_id(&server),
                    "create committed"
                );
                self.announce(MutationKind::Create, &server);
                Ok(server)
            }
            Err(err) => {
                self.report(MutationKind::Create, &temp_id, &err);
                Err(err)
            }
        }
    }

    /// Applies `apply` to the store immediately, then reconciles with the
    /// server result.
    pub async fn update<A, Fut>(
        &self,
        id: &T::Id,
        apply: A,
        remote: Fut,
    ) -> Result<T::Entity, MutationError>
    where
        A: FnOnce(&T) -> Result<(), MutationError>,
        Fut: Future<Output = Result<T::Entity, RpcError>>,
    {
        let version = self.begin(id, MutationKind::Update, apply)?;
        let outcome = self.call(remote).await;
        self.finish(id, version, MutationKind::Update, outcome, |target, server| {
            target.reconcile(server)
        })
    }

    /// Like [`update`](Self::update) for deletions; the deletion is undone if
    /// the server refuses.
    pub async fn delete<A, Fut>(&self, id: &T::Id, apply: A, remote: Fut) -> Result<(), MutationError>
    where
        A: FnOnce(&T) -> Result<(), MutationError>,
        Fut: Future<Output = Result<(), RpcError>>,
    {
        let version = self.begin(id, MutationKind::Delete, apply)?;
        let outcome = self.call(remote).await;

        let mut inflight = self.inflight.lock();
        let current = inflight.get(id).map(|f| f.version) == Some(version);
        if !current {
            debug!(target: "realtime::optimistic", entity = T::ENTITY, id = %id, "superseded delete resolved");
            return Err(MutationError::Superseded);
        }
        let Some(InFlight { base, applied, .. }) = inflight.remove(id) else {
            return Err(MutationError::Superseded);
        };
        drop(inflight);
        match outcome {
            Ok(()) => {
                info!(target: "realtime::optimistic", entity = T::ENTITY, id = %id, "delete committed");
                if let Some(base) = base {
                    self.announce(MutationKind::Delete, &base);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(base) = base {
                    self.target.revert(base, applied.as_ref());
                }
                self.report(MutationKind::Delete, id, &err);
                Err(err)
            }
        }
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers the mutation and runs the local apply under the in-flight
    /// lock so no other mutation on `id` can interleave.
    fn begin<A>(&self, id: &T::Id, kind: MutationKind, apply: A) -> Result<u64, MutationError>
    where
        A: FnOnce(&T) -> Result<(), MutationError>,
    {
        if T::is_temporary(id) {
            return Err(MutationError::Rejected(format!(
                "{} {id} has not been created yet",
                T::ENTITY
            )));
        }
        let mut inflight = self.inflight.lock();
        let base = match inflight.get(id) {
            Some(previous) => {
                debug!(
                    target: "realtime::optimistic",
                    entity = T::ENTITY,
                    id = %id,
                    superseded = previous.version,
                    "superseding in-flight mutation"
                );
                previous.base.clone()
            }
            None => Some(self.target.snapshot(id).ok_or_else(|| MutationError::NotFound {
                kind: T::ENTITY,
                id: id.to_string(),
            })?),
        };
        apply(&self.target)?;
        let applied = self.target.snapshot(id);
        let version = self.next_version();
        inflight.insert(
            id.clone(),
            InFlight {
                version,
                base,
                applied,
            },
        );
        debug!(target: "realtime::optimistic", entity = T::ENTITY, id = %id, %kind, version, "optimistic change applied");
        Ok(version)
    }

    fn finish<F>(
        &self,
        id: &T::Id,
        version: u64,
        kind: MutationKind,
        outcome: Result<T::Entity, MutationError>,
        commit: F,
    ) -> Result<T::Entity, MutationError>
    where
        F: FnOnce(&T, &T::Entity),
    {
        let mut inflight = self.inflight.lock();
        let current = inflight.get(id).map(|f| f.version) == Some(version);
        if !current {
            if let (Ok(server), Some(newer)) = (&outcome, inflight.get_mut(id)) {
                // The server accepted this edit, so a newer edit that fails
                // should fall back to it rather than to the older snapshot.
                newer.base = Some(server.clone());
            }
            debug!(target: "realtime::optimistic", entity = T::ENTITY, id = %id, version, "superseded mutation resolved");
            return Err(MutationError::Superseded);
        }
        let Some(InFlight { base, applied, .. }) = inflight.remove(id) else {
            return Err(MutationError::Superseded);
        };
        drop(inflight);
        match outcome {
            Ok(server) => {
                commit(&self.target, &server);
                info!(target: "realtime::optimistic", entity = T::ENTITY, id = %id, %kind, "mutation committed");
                self.announce(kind, &server);
                Ok(server)
            }
            Err(err) => {
                if let Some(base) = base {
                    self.target.revert(base, applied.as_ref());
                }
                self.report(kind, id, &err);
                Err(err)
            }
        }
    }

    async fn call<R, Fut>(&self, remote: Fut) -> Result<R, MutationError>
    where
        Fut: Future<Output = Result<R, RpcError>>,
    {
        match tokio::time::timeout(self.timeout, remote).await {
            Ok(result) => result.map_err(MutationError::from),
            Err(_) => Err(MutationError::Timeout(self.timeout)),
        }
    }

    fn announce(&self, kind: MutationKind, entity: &T::Entity) {
        let Some(peers) = &self.peers else {
            return;
        };
        if let Some(event) = self.target.peer_event(kind, entity) {
            peers.send(event);
        }
    }

    fn report(&self, kind: MutationKind, id: &T::Id, err: &MutationError) {
        warn!(
            target: "realtime::optimistic",
            entity = T::ENTITY,
            id = %id,
            %kind,
            error = %err,
            "mutation failed; rolled back"
        );
        let _ = self.failures.send(MutationFailure {
            entity: T::ENTITY,
            id: id.to_string(),
            kind,
            message: err.to_string(),
        });
    }
}

/// The one reaction a user can hold per emoji on a comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReactionSlot {
    comment: CommentId,
    user: UserId,
    emoji: String,
}

struct PendingToggle {
    version: u64,
    /// Slot contents last confirmed by the server.
    confirmed: Option<Reaction>,
}

fn settled(toggle: &ReactionToggle) -> Option<Reaction> {
    match toggle {
        ReactionToggle::Added { reaction } => Some(reaction.clone()),
        ReactionToggle::Removed { .. } => None,
    }
}

/// Optimistic reaction toggles, tracked per `(comment, user, emoji)` slot.
///
/// Follows the same rule as [`OptimisticCoordinator`]: a newer toggle of a
/// slot supersedes the older one, and only the newest toggle's outcome is
/// written back. Success settles the slot on the server's verdict; failure
/// puts back whatever the server last confirmed. Other slots on the comment
/// are never touched.
pub struct ReactionToggles {
    store: CommentThreadStore,
    inflight: Mutex<HashMap<ReactionSlot, PendingToggle>>,
    next_version: AtomicU64,
    timeout: Duration,
    failures: broadcast::Sender<MutationFailure>,
}

impl ReactionToggles {
    pub fn new(
        store: CommentThreadStore,
        timeout: Duration,
        failures: broadcast::Sender<MutationFailure>,
    ) -> Self {
        Self {
            store,
            inflight: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            timeout,
            failures,
        }
    }

    pub fn in_flight(&self, comment: &CommentId, user: &UserId, emoji: &str) -> bool {
        self.inflight.lock().contains_key(&ReactionSlot {
            comment: comment.clone(),
            user: user.clone(),
            emoji: emoji.to_string(),
        })
    }

    pub async fn toggle<Fut>(
        &self,
        comment: &CommentId,
        user: &UserId,
        emoji: &str,
        remote: Fut,
    ) -> Result<ReactionToggle, MutationError>
    where
        Fut: Future<Output = Result<ReactionToggle, RpcError>>,
    {
        let slot = ReactionSlot {
            comment: comment.clone(),
            user: user.clone(),
            emoji: emoji.to_string(),
        };
        let (version, local) = {
            let mut inflight = self.inflight.lock();
            let confirmed = match inflight.get(&slot) {
                Some(previous) => previous.confirmed.clone(),
                None => self
                    .store
                    .comment(comment)
                    .ok_or_else(|| MutationError::NotFound {
                        kind: "comment",
                        id: comment.to_string(),
                    })?
                    .reactions()
                    .iter()
                    .find(|r| &r.user_id == user && r.emoji == emoji)
                    .cloned(),
            };
            let local = self.store.toggle_reaction(comment, user, emoji)?;
            let version = self.next_version.fetch_add(1, Ordering::SeqCst);
            inflight.insert(slot.clone(), PendingToggle { version, confirmed });
            (version, local)
        };
        debug!(target: "realtime::optimistic", entity = "reaction", comment = %comment, emoji, version, "optimistic toggle applied");

        let outcome = match tokio::time::timeout(self.timeout, remote).await {
            Ok(result) => result.map_err(MutationError::from),
            Err(_) => Err(MutationError::Timeout(self.timeout)),
        };

        let mut inflight = self.inflight.lock();
        let current = inflight.get(&slot).map(|p| p.version) == Some(version);
        if !current {
            if let (Ok(server), Some(newer)) = (&outcome, inflight.get_mut(&slot)) {
                newer.confirmed = settled(server);
            }
            debug!(target: "realtime::optimistic", entity = "reaction", comment = %comment, version, "superseded toggle resolved");
            return Err(MutationError::Superseded);
        }
        let Some(pending) = inflight.remove(&slot) else {
            return Err(MutationError::Superseded);
        };
        drop(inflight);

        match outcome {
            Ok(server) => {
                self.store
                    .settle_reaction(comment, user, emoji, settled(&server));
                Ok(server)
            }
            Err(err) => {
                self.store
                    .settle_reaction(comment, user, emoji, pending.confirmed);
                let kind = match local {
                    ReactionToggle::Added { .. } => MutationKind::Create,
                    ReactionToggle::Removed { .. } => MutationKind::Delete,
                };
                warn!(
                    target: "realtime::optimistic",
                    entity = "reaction",
                    comment = %comment,
                    %kind,
                    error = %err,
                    "reaction toggle failed; rolled back"
                );
                let _ = self.failures.send(MutationFailure {
                    entity: "reaction",
                    id: comment.to_string(),
                    kind,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

impl MutationTarget for TaskStore {
    type Id = TaskId;
    type Entity = Task;

    const ENTITY: &'static str = "task";

    fn entity_id(entity: &Task) -> TaskId {
        entity.id.clone()
    }

    fn is_temporary(id: &TaskId) -> bool {
        id.is_temporary()
    }

    fn snapshot(&self, id: &TaskId) -> Option<Task> {
        self.get(id)
    }

    fn insert(&self, entity: Task) {
        self.upsert(entity);
    }

    fn remove(&self, id: &TaskId) {
        TaskStore::remove(self, id);
    }

    fn revert(&self, base: Task, applied: Option<&Task>) {
        TaskStore::revert(self, base, applied);
    }

    fn reconcile(&self, server: &Task) {
        self.upsert(server.clone());
    }

    fn peer_event(&self, kind: MutationKind, entity: &Task) -> Option<ClientEvent> {
        match kind {
            MutationKind::Create | MutationKind::Update => {
                Some(ClientEvent::TaskUpdate(entity.clone()))
            }
            MutationKind::Delete => None,
        }
    }
}

impl MutationTarget for CommentThreadStore {
    type Id = CommentId;
    type Entity = Comment;

    const ENTITY: &'static str = "comment";

    fn entity_id(entity: &Comment) -> CommentId {
        entity.id.clone()
    }

    fn is_temporary(id: &CommentId) -> bool {
        id.is_temporary()
    }

    fn snapshot(&self, id: &CommentId) -> Option<Comment> {
        self.comment(id)
    }

    fn insert(&self, entity: Comment) {
        self.add_comment(entity);
    }

    fn remove(&self, id: &CommentId) {
        self.remove_comment(id);
    }

    fn revert(&self, base: Comment, applied: Option<&Comment>) {
        // Comment deletes are soft, so a local change never removes one.
        if let Some(applied) = applied {
            self.revert_comment(base, applied);
        }
    }

    fn reconcile(&self, server: &Comment) {
        self.merge_server_comment(server);
    }

    fn peer_event(&self, kind: MutationKind, entity: &Comment) -> Option<ClientEvent> {
        let event = match kind {
            MutationKind::Create => ClientEvent::CommentCreated(CommentPayload {
                task_id: entity.task_id.clone(),
                comment: entity.clone(),
            }),
            MutationKind::Update => ClientEvent::CommentUpdated(CommentPayload {
                task_id: entity.task_id.clone(),
                comment: entity.clone(),
            }),
            MutationKind::Delete => ClientEvent::CommentDeleted(CommentRef {
                task_id: entity.task_id.clone(),
                comment_id: entity.id.clone(),
            }),
        };
        Some(event)
    }
}
