use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use wadmin_db::Database;
use wadmin_realtime::ChangeFeed;
use wadmin_types::events::{ChangeAction, Collection, RealtimeEvent};
use wadmin_upstream::{GatewayApi, WorkflowApi};

use crate::instances::PendingNames;
use crate::reachability::Reachability;
use crate::registry::SelectionStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub gateway: Arc<dyn GatewayApi>,
    pub workflow: Arc<dyn WorkflowApi>,
    pub feed: ChangeFeed,
    pub selections: SelectionStore,
    pub pending_names: PendingNames,
    pub reachability: Reachability,
}

impl AppStateInner {
    pub fn new(
        db: Database,
        jwt_secret: String,
        gateway: Arc<dyn GatewayApi>,
        workflow: Arc<dyn WorkflowApi>,
    ) -> Self {
        Self {
            db,
            jwt_secret,
            gateway,
            workflow,
            feed: ChangeFeed::new(),
            selections: SelectionStore::default(),
            pending_names: PendingNames::default(),
            reachability: Reachability::default(),
        }
    }

    /// Announce a row change on the realtime feed.
    pub fn publish<T: Serialize>(
        &self,
        collection: Collection,
        action: ChangeAction,
        id: Uuid,
        owner_id: Option<Uuid>,
        record: Option<&T>,
    ) {
        self.feed.publish(RealtimeEvent::record_changed(
            collection, action, id, owner_id, record,
        ));
    }
}
