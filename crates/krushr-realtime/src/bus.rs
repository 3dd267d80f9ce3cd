use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use krushr_proto::{ConversationId, ServerEvent, TaskId, WorkspaceId};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{trace, warn};

const TOPIC_CAPACITY: usize = 64;

/// Logical resource a subscriber can follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Task(TaskId),
    Conversation(ConversationId),
    Workspace(WorkspaceId),
    /// Every `workspace-change` across workspaces the server streams to us.
    WorkspaceActivity,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Task(id) => write!(f, "task/{id}"),
            Topic::Conversation(id) => write!(f, "conversation/{id}"),
            Topic::Workspace(id) => write!(f, "workspace/{id}"),
            Topic::WorkspaceActivity => f.write_str("workspace-activity"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub topic: Topic,
    pub event: Arc<ServerEvent>,
}

/// Observes the first subscriber arriving on a topic and the last one leaving.
pub trait MembershipHook: Send + Sync {
    fn first_joined(&self, topic: &Topic);
    fn last_left(&self, topic: &Topic);
}

struct TopicState {
    sender: broadcast::Sender<ResourceUpdate>,
    subscribers: usize,
}

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<Topic, TopicState>>,
    hook: RwLock<Option<Arc<dyn MembershipHook>>>,
}

impl BusInner {
    fn hook(&self) -> Option<Arc<dyn MembershipHook>> {
        self.hook.read().clone()
    }
}

/// Per-resource fan-out of decoded server events.
///
/// Topics exist only while someone is subscribed; publishing to a topic with
/// no subscribers is a no-op.
#[derive(Clone, Default)]
pub struct ResourceBus {
    inner: Arc<BusInner>,
}

impl ResourceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_membership_hook(&self, hook: Arc<dyn MembershipHook>) {
        *self.inner.hook.write() = Some(hook);
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (receiver, first) = {
            let mut topics = self.inner.topics.write();
            let state = topics.entry(topic.clone()).or_insert_with(|| TopicState {
                sender: broadcast::channel(TOPIC_CAPACITY).0,
                subscribers: 0,
            });
            state.subscribers += 1;
            (state.sender.subscribe(), state.subscribers == 1)
        };
        if first {
            trace!(target: "realtime::dispatch", topic = %topic, "first subscriber");
            if let Some(hook) = self.inner.hook() {
                hook.first_joined(&topic);
            }
        }
        Subscription {
            topic,
            receiver,
            bus: self.inner.clone(),
        }
    }

    /// Returns how many subscribers received the update.
    pub fn publish(&self, topic: Topic, event: Arc<ServerEvent>) -> usize {
        let topics = self.inner.topics.read();
        let Some(state) = topics.get(&topic) else {
            return 0;
        };
        state
            .sender
            .send(ResourceUpdate {
                topic: topic.clone(),
                event,
            })
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|state| state.subscribers)
            .unwrap_or(0)
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner.topics.read().keys().cloned().collect()
    }
}

/// Live subscription to one topic. Dropping it leaves the topic.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<ResourceUpdate>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next update, skipping over any the subscriber was too slow to see.
    pub async fn recv(&mut self) -> Option<ResourceUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "realtime::dispatch",
                        topic = %self.topic,
                        skipped,
                        "subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ResourceUpdate> {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => return Some(update),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let last = {
            let mut topics = self.bus.topics.write();
            match topics.get_mut(&self.topic) {
                Some(state) => {
                    state.subscribers = state.subscribers.saturating_sub(1);
                    if state.subscribers == 0 {
                        topics.remove(&self.topic);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if last {
            trace!(target: "realtime::dispatch", topic = %self.topic, "last subscriber left");
            if let Some(hook) = self.bus.hook() {
                hook.last_left(&self.topic);
            }
        }
    }
}
