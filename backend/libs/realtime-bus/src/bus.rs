use crate::registry::ConnectionRegistry;
use redis::AsyncCommands;
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL: &str = "order_updates";

/// Cross-instance overlay: every instance subscribes to `order_updates` at
/// startup and re-delivers anything addressed to a user it holds a socket
/// for locally. Publishing instances also deliver locally so their own
/// clients don't wait on a pub/sub round trip.
#[derive(Clone)]
pub struct RealtimeBus {
    redis: RedisPool,
    registry: ConnectionRegistry,
}

impl RealtimeBus {
    pub fn new(redis: RedisPool, registry: ConnectionRegistry) -> Self {
        Self { redis, registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Publishes `payload` (already-serialized JSON) on the overlay channel
    /// and also delivers it to any local socket for `user_id`.
    pub async fn publish(&self, user_id: i64, payload: String) -> redis::RedisResult<()> {
        self.registry.broadcast(user_id, payload.clone()).await;

        let manager = self.redis.manager();
        let mut conn = manager.lock().await;
        conn.publish::<_, _, i64>(CHANNEL, payload).await?;
        Ok(())
    }

    /// Runs the subscriber loop until the process shuts down. Every message
    /// received is parsed just far enough to find `user_id`, then handed to
    /// the local registry; unparseable frames are logged and skipped rather
    /// than killing the loop.
    pub async fn run_subscriber(self: Arc<Self>, redis_url: String) {
        loop {
            match self.subscribe_once(&redis_url).await {
                Ok(()) => {
                    tracing::warn!("order_updates subscription ended, reconnecting");
                }
                Err(err) => {
                    tracing::error!(error = %err, "order_updates subscription failed, reconnecting");
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn subscribe_once(&self, redis_url: &str) -> redis::RedisResult<()> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(CHANNEL).await?;

        let mut stream = pubsub.on_message();
        use futures_util::StreamExt;
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping non-UTF8 order_updates frame");
                    continue;
                }
            };
            self.dispatch_local(&payload).await;
        }
        Ok(())
    }

    async fn dispatch_local(&self, payload: &str) {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed order_updates frame");
                return;
            }
        };
        let Some(user_id) = value.get("user_id").and_then(|v| v.as_i64()) else {
            tracing::warn!("order_updates frame missing user_id");
            return;
        };
        self.registry.broadcast(user_id, payload.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_local_routes_by_user_id() {
        let redis = RedisPool::connect("redis://127.0.0.1:6390/0", None).await;
        // No live Redis in unit tests; only exercise the parsing/dispatch path.
        if redis.is_err() {
            return;
        }
        let bus = RealtimeBus::new(redis.unwrap(), ConnectionRegistry::new());
        let (_id, mut rx) = bus.registry().add_subscriber(7).await;
        bus.dispatch_local(r#"{"type":"order_update","user_id":7,"order_id":1}"#).await;
        assert!(rx.recv().await.is_some());
    }
}
