use std::collections::BTreeSet;
use std::sync::Arc;

use krushr_proto::UserId;
use parking_lot::RwLock;

/// Users the server reports as online.
#[derive(Clone, Default)]
pub struct PresenceStore {
    online: Arc<RwLock<BTreeSet<UserId>>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, user: UserId) -> bool {
        self.online.write().insert(user)
    }

    pub fn set_offline(&self, user: &UserId) -> bool {
        self.online.write().remove(user)
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.read().contains(user)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.online.read().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.online.write().clear();
    }
}
