use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted collections that publish change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Instances,
    Groups,
    Messages,
    SystemLogs,
    UserFeedback,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instances => "instances",
            Self::Groups => "groups",
            Self::Messages => "messages",
            Self::SystemLogs => "system_logs",
            Self::UserFeedback => "user_feedback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// Events pushed over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid, username: String },

    /// A row in one of the collections was created, updated or deleted.
    /// `record` is the row after the change (`null` for deletions).
    RecordChanged {
        collection: Collection,
        action: ChangeAction,
        id: Uuid,
        owner_id: Option<Uuid>,
        record: serde_json::Value,
    },
}

impl RealtimeEvent {
    pub fn record_changed<T: Serialize>(
        collection: Collection,
        action: ChangeAction,
        id: Uuid,
        owner_id: Option<Uuid>,
        record: Option<&T>,
    ) -> Self {
        let record = record
            .and_then(|r| serde_json::to_value(r).ok())
            .unwrap_or(serde_json::Value::Null);
        Self::RecordChanged {
            collection,
            action,
            id,
            owner_id,
            record,
        }
    }

    /// Owner of the changed row. `None` means the event is visible to every
    /// connected user (logs and feedback are shared admin views).
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            Self::RecordChanged { owner_id, .. } => *owner_id,
            Self::Ready { .. } => None,
        }
    }

    pub fn collection(&self) -> Option<Collection> {
        match self {
            Self::RecordChanged { collection, .. } => Some(*collection),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the connection. Must be the first message.
    Identify { token: String },

    /// Only forward changes for these collections. An empty list restores
    /// the default of forwarding everything.
    Subscribe { collections: Vec<Collection> },
}
