use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifies one registered socket so it can be removed without disturbing
/// other sockets owned by the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<String>,
}

/// Per-instance mapping from user id to every socket this instance currently
/// holds open for that user. A user may have zero, one, or many concurrent
/// sockets (multiple tabs, multiple devices).
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<i64, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new socket for `user_id`. Returns the id to unregister it
    /// later and the receiving end the caller should drain into its socket.
    pub async fn add_subscriber(&self, user_id: i64) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId::new();

        let mut map = self.inner.write().await;
        map.entry(user_id).or_insert_with(Vec::new).push(Subscriber { id, sender: tx });

        (id, rx)
    }

    /// Removes exactly the one socket identified by `subscriber_id`. Cleans
    /// up the user's entry entirely once their last socket is gone, so the
    /// map doesn't accumulate empty Vecs for users who have disconnected.
    pub async fn remove_subscriber(&self, user_id: i64, subscriber_id: SubscriberId) {
        let mut map = self.inner.write().await;
        if let Some(subscribers) = map.get_mut(&user_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    /// Sends `message` to every local socket registered for `user_id`.
    /// Sockets whose receiver has already dropped are pruned from the map
    /// as a side effect, matching the "sends that throw unregister the
    /// socket" rule: a dead send removes only that one socket, delivery to
    /// the user's other sockets is unaffected.
    pub async fn broadcast(&self, user_id: i64, message: String) {
        let mut map = self.inner.write().await;
        if let Some(subscribers) = map.get_mut(&user_id) {
            subscribers.retain(|s| s.sender.send(message.clone()).is_ok());
            if subscribers.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    pub async fn subscriber_count(&self, user_id: i64) -> usize {
        let map = self.inner.read().await;
        map.get(&user_id).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn connected_users(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.add_subscriber(7).await;

        registry.broadcast(7, "hello".to_string()).await;

        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_socket_for_a_user() {
        let registry = ConnectionRegistry::new();
        let (_id1, mut rx1) = registry.add_subscriber(7).await;
        let (_id2, mut rx2) = registry.add_subscriber(7).await;

        registry.broadcast(7, "update".to_string()).await;

        assert_eq!(rx1.recv().await, Some("update".to_string()));
        assert_eq!(rx2.recv().await, Some("update".to_string()));
    }

    #[tokio::test]
    async fn remove_subscriber_leaves_others_untouched() {
        let registry = ConnectionRegistry::new();
        let (id1, mut rx1) = registry.add_subscriber(7).await;
        let (_id2, mut rx2) = registry.add_subscriber(7).await;

        registry.remove_subscriber(7, id1).await;
        registry.broadcast(7, "still here".to_string()).await;

        assert!(rx1.recv().await.is_none());
        assert_eq!(rx2.recv().await, Some("still here".to_string()));
    }

    #[tokio::test]
    async fn last_subscriber_removal_clears_the_user_entry() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.add_subscriber(7).await;

        registry.remove_subscriber(7, id).await;

        assert_eq!(registry.connected_users().await, 0);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_user_is_a_noop() {
        let registry = ConnectionRegistry::new();
        registry.broadcast(404, "nobody home".to_string()).await;
        assert_eq!(registry.subscriber_count(404).await, 0);
    }

    #[tokio::test]
    async fn dead_receiver_is_pruned_on_next_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_id, rx) = registry.add_subscriber(7).await;
        drop(rx);

        registry.broadcast(7, "into the void".to_string()).await;

        assert_eq!(registry.subscriber_count(7).await, 0);
    }
}
