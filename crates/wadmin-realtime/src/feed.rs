use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::warn;
use uuid::Uuid;

use wadmin_types::events::{Collection, RealtimeEvent};

/// An event serialized once and shared by every connection.
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub collection: Option<Collection>,
    pub owner_id: Option<Uuid>,
    pub json: Arc<str>,
}

impl FeedMessage {
    /// Whether a connection for `user_id`, subscribed to `collections`
    /// (empty = everything), should receive this message.
    pub fn visible_to(&self, user_id: Uuid, collections: &[Collection]) -> bool {
        if self.owner_id.is_some_and(|owner| owner != user_id) {
            return false;
        }
        match self.collection {
            Some(c) if !collections.is_empty() => collections.contains(&c),
            _ => true,
        }
    }
}

/// Fans change events out to all realtime connections.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<ChangeFeedInner>,
}

struct ChangeFeedInner {
    broadcast_tx: broadcast::Sender<FeedMessage>,

    /// Live connections: conn_id -> user_id
    connections: RwLock<HashMap<Uuid, Uuid>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(ChangeFeedInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn publish(&self, event: RealtimeEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Dropping unserializable realtime event: {}", e);
                return;
            }
        };
        let _ = self.inner.broadcast_tx.send(FeedMessage {
            collection: event.collection(),
            owner_id: event.owner_id(),
            json: json.into(),
        });
    }

    pub async fn register(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.connections.write().await.insert(conn_id, user_id);
        conn_id
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}
