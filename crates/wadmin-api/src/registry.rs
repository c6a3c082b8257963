//! Per-operator "selected instance" pointer.
//!
//! The console acts on one instance at a time. The pointer lives only in
//! process memory, keyed by user; restarting the server resets it and the
//! next listing picks a default again.

use std::collections::HashMap;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use wadmin_types::api::{Claims, SelectInstanceRequest, SelectionResponse};
use wadmin_types::models::{Instance, InstanceStatus};

use crate::error::ApiError;
use crate::instances::load_owned_instance;
use crate::state::AppState;

/// Page size used when the selection has to be seeded from a listing.
const SEED_PAGE_SIZE: u32 = 20;

/// First connected instance, else the first instance.
pub fn default_selection(instances: &[Instance]) -> Option<&Instance> {
    instances
        .iter()
        .find(|i| i.status == InstanceStatus::Connected)
        .or_else(|| instances.first())
}

#[derive(Default)]
pub struct SelectionStore {
    selected: RwLock<HashMap<Uuid, Uuid>>,
}

impl SelectionStore {
    pub async fn get(&self, user_id: Uuid) -> Option<Uuid> {
        self.selected.read().await.get(&user_id).copied()
    }

    pub async fn set(&self, user_id: Uuid, instance_id: Uuid) {
        self.selected.write().await.insert(user_id, instance_id);
    }

    pub async fn clear(&self, user_id: Uuid) {
        self.selected.write().await.remove(&user_id);
    }

    /// Drop every pointer to a deleted instance.
    pub async fn forget_instance(&self, instance_id: Uuid) {
        self.selected.write().await.retain(|_, id| *id != instance_id);
    }

    /// Feed the latest listing of the operator's instances.
    ///
    /// An empty listing clears the pointer. A non-empty listing seeds it
    /// with [`default_selection`] only if nothing is selected yet; an
    /// existing choice is never replaced, even by a better candidate.
    pub async fn observe(&self, user_id: Uuid, instances: &[Instance]) -> Option<Uuid> {
        let mut selected = self.selected.write().await;
        if instances.is_empty() {
            selected.remove(&user_id);
            return None;
        }
        if let Some(id) = selected.get(&user_id) {
            return Some(*id);
        }
        let choice = default_selection(instances)?.id;
        debug!("Seeding selection for {} with {}", user_id, choice);
        selected.insert(user_id, choice);
        Some(choice)
    }
}

/// The operator's selected instance, seeding the pointer from the newest
/// instances if it is unset. Returns `None` when the operator has none.
pub async fn current_selection(state: &AppState, user_id: Uuid) -> Result<Option<Instance>, ApiError> {
    if let Some(id) = state.selections.get(user_id).await {
        if let Some(instance) = state.db.get_instance(id)? {
            return Ok(Some(instance));
        }
        // Row vanished behind our back; reseed below.
        state.selections.clear(user_id).await;
    }

    let (instances, _) = state.db.list_instances(user_id, SEED_PAGE_SIZE, 0)?;
    let Some(id) = state.selections.observe(user_id, &instances).await else {
        return Ok(None);
    };
    Ok(instances.into_iter().find(|i| i.id == id))
}

/// Resolve the instance an action targets: the explicit id if given,
/// otherwise the operator's selection.
pub async fn resolve_target(
    state: &AppState,
    user_id: Uuid,
    explicit: Option<Uuid>,
) -> Result<Instance, ApiError> {
    match explicit {
        Some(id) => load_owned_instance(state, user_id, id),
        None => current_selection(state, user_id)
            .await?
            .ok_or_else(|| ApiError::Precondition("select an instance first".into())),
    }
}

// -- Handlers --

pub async fn get_selection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = current_selection(&state, claims.sub).await?;
    Ok(Json(SelectionResponse { instance }))
}

pub async fn set_selection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SelectInstanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = load_owned_instance(&state, claims.sub, req.instance_id)?;
    state.selections.set(claims.sub, instance.id).await;
    Ok(Json(SelectionResponse {
        instance: Some(instance),
    }))
}

pub async fn clear_selection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    state.selections.clear(claims.sub).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{instance_with, seed_instance, seed_user, test_state};

    #[test]
    fn prefers_first_connected() {
        let user = Uuid::new_v4();
        let list = vec![
            instance_with(user, "a", InstanceStatus::Disconnected),
            instance_with(user, "b", InstanceStatus::Connected),
            instance_with(user, "c", InstanceStatus::Connected),
        ];
        assert_eq!(default_selection(&list).unwrap().name, "b");
    }

    #[test]
    fn falls_back_to_first() {
        let user = Uuid::new_v4();
        let list = vec![
            instance_with(user, "a", InstanceStatus::QrNeeded),
            instance_with(user, "b", InstanceStatus::Error),
        ];
        assert_eq!(default_selection(&list).unwrap().name, "a");
        assert!(default_selection(&[]).is_none());
    }

    #[tokio::test]
    async fn selection_is_computed_once_per_non_empty_transition() {
        let store = SelectionStore::default();
        let user = Uuid::new_v4();
        let first = vec![
            instance_with(user, "a", InstanceStatus::Disconnected),
            instance_with(user, "b", InstanceStatus::QrNeeded),
        ];
        let chosen = store.observe(user, &first).await.unwrap();
        assert_eq!(chosen, first[0].id);

        // A connected instance appearing later does not move the pointer.
        let mut later = first.clone();
        later.push(instance_with(user, "c", InstanceStatus::Connected));
        assert_eq!(store.observe(user, &later).await, Some(chosen));

        // Empty listing resets; the next non-empty one recomputes.
        assert_eq!(store.observe(user, &[]).await, None);
        assert_eq!(store.observe(user, &later).await, Some(later[2].id));
    }

    #[tokio::test]
    async fn forget_instance_clears_pointer() {
        let store = SelectionStore::default();
        let user = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        store.set(user, instance_id).await;
        store.forget_instance(instance_id).await;
        assert_eq!(store.get(user).await, None);
    }

    #[tokio::test]
    async fn current_selection_picks_connected_from_store() {
        let (state, _, _) = test_state();
        let user = seed_user(&state);
        // Listing is newest first: "second" (connected) is listed before "first".
        seed_instance(&state, user, "first", InstanceStatus::Disconnected);
        let second = seed_instance(&state, user, "second", InstanceStatus::Connected);

        let selected = current_selection(&state, user).await.unwrap().unwrap();
        assert_eq!(selected.id, second.id);
    }

    #[tokio::test]
    async fn resolve_without_instances_is_precondition_failure() {
        let (state, _, _) = test_state();
        let user = seed_user(&state);
        let err = resolve_target(&state, user, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
    }

    #[tokio::test]
    async fn resolve_rejects_other_operators_instance() {
        let (state, _, _) = test_state();
        let owner = seed_user(&state);
        let intruder = seed_user(&state);
        let inst = seed_instance(&state, owner, "private", InstanceStatus::Connected);

        let err = resolve_target(&state, intruder, Some(inst.id)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("instance")));
    }
}
