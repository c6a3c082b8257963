use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use wadmin_types::api::{
    Claims, CreateInstanceRequest, Page, PageQuery, QrCodeResponse, UpdateInstanceRequest,
};
use wadmin_types::events::{ChangeAction, Collection};
use wadmin_types::models::{Instance, InstanceStatus};

use crate::error::ApiError;
use crate::reconciler;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Instance names become gateway path segments and must stay simple.
fn validate_name(name: &str) -> Result<(), ApiError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "instance name may only contain letters, digits, '-' and '_'".into(),
        ))
    }
}

/// Names with a create in flight. The gateway call happens before the row
/// exists, so the database alone cannot stop two creates for one name.
#[derive(Default)]
pub struct PendingNames {
    names: Mutex<HashSet<String>>,
}

pub struct NameReservation<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

fn lock(names: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    names.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PendingNames {
    /// `None` if another create already holds `name`.
    pub fn reserve(&self, name: &str) -> Option<NameReservation<'_>> {
        if !lock(&self.names).insert(name.to_string()) {
            return None;
        }
        Some(NameReservation {
            names: &self.names,
            name: name.to_string(),
        })
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        lock(self.names).remove(&self.name);
    }
}

/// Load an instance owned by `user_id`. Someone else's instance reads as
/// missing.
pub fn load_owned_instance(state: &AppState, user_id: Uuid, id: Uuid) -> Result<Instance, ApiError> {
    state
        .db
        .get_instance(id)?
        .filter(|i| i.user_id == user_id)
        .ok_or(ApiError::NotFound("instance"))
}

fn publish_instance(state: &AppState, action: ChangeAction, instance: &Instance) {
    state.publish(
        Collection::Instances,
        action,
        instance.id,
        Some(instance.user_id),
        Some(instance),
    );
}

/// GET /instances: newest first. Also feeds the selection pointer.
pub async fn list_instances(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = query.limit_offset(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let (items, total) = state.db.list_instances(claims.sub, limit, offset)?;

    if total == 0 {
        state.selections.observe(claims.sub, &[]).await;
    } else if offset == 0 {
        state.selections.observe(claims.sub, &items).await;
    }

    Ok(Json(Page {
        items,
        total,
        page: query.page.max(1),
        page_size: limit,
    }))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_owned_instance(&state, claims.sub, id)?))
}

/// POST /instances: register with the gateway first; only a successful
/// gateway call produces a local row.
pub async fn create_instance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_name(&req.name)?;
    let taken = || format!("instance '{}' already exists", req.name);

    // Held until this handler returns, so a concurrent create for the same
    // name is refused before it reaches the gateway.
    let _reservation = state
        .pending_names
        .reserve(&req.name)
        .ok_or_else(|| ApiError::Conflict(taken()))?;
    if state.db.instance_name_exists(&req.name)? {
        return Err(ApiError::Conflict(taken()));
    }

    let created = state.gateway.create_instance(&req.name).await?;

    let now = Utc::now();
    let instance = Instance {
        id: Uuid::new_v4(),
        name: req.name,
        status: InstanceStatus::QrNeeded,
        qr_code: (!created.qr_code.is_empty()).then_some(created.qr_code),
        phone_number: req.phone_number,
        user_id: claims.sub,
        created_at: now,
        updated_at: now,
        last_connected_at: None,
    };

    if let Err(e) = state.db.insert_instance(&instance) {
        // The gateway already knows this instance; it is orphaned there
        // until someone deletes it by name.
        error!("Gateway created {} but the local insert failed: {:#}", instance.name, e);
        return Err(ApiError::from_insert(e, || {
            format!("instance '{}' already exists", instance.name)
        }));
    }

    info!("Created instance {} ({})", instance.name, instance.id);
    publish_instance(&state, ChangeAction::Created, &instance);

    Ok((StatusCode::CREATED, Json(instance)))
}

/// PATCH /instances/{id}: passthrough edit of status and phone number.
pub async fn update_instance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInstanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut instance = load_owned_instance(&state, claims.sub, id)?;
    let now = Utc::now();

    if let Some(phone) = req.phone_number {
        let phone = phone.trim();
        instance = state
            .db
            .update_instance_phone(id, (!phone.is_empty()).then_some(phone), now)?
            .ok_or(ApiError::NotFound("instance"))?;
    }

    if let Some(status) = req.status {
        let stamp = (status == InstanceStatus::Connected).then_some(now);
        instance = state
            .db
            .update_instance_status(id, status, now, stamp)?
            .ok_or(ApiError::NotFound("instance"))?;
    }

    publish_instance(&state, ChangeAction::Updated, &instance);
    Ok(Json(instance))
}

/// DELETE /instances/{id}: gateway first; a gateway failure keeps the row.
/// Groups and messages recorded for the instance are left alone.
pub async fn delete_instance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = load_owned_instance(&state, claims.sub, id)?;

    state.gateway.delete_instance(&instance.name).await?;
    state.db.delete_instance(id)?;
    state.selections.forget_instance(id).await;

    info!("Deleted instance {} ({})", instance.name, id);
    state.publish::<Instance>(
        Collection::Instances,
        ChangeAction::Deleted,
        id,
        Some(instance.user_id),
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}

/// GET /instances/{id}/qr: fetch a fresh QR from the gateway and keep it on
/// the record.
pub async fn instance_qr(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = load_owned_instance(&state, claims.sub, id)?;
    let qr_code = state.gateway.get_instance_qr(&instance.name).await?;

    if let Some(updated) = state.db.update_instance_qr(id, &qr_code, Utc::now())? {
        publish_instance(&state, ChangeAction::Updated, &updated);
    }

    Ok(Json(QrCodeResponse {
        instance_id: id,
        qr_code,
    }))
}

/// POST /instances/{id}/refresh: reconcile status with the gateway.
pub async fn refresh_instance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = load_owned_instance(&state, claims.sub, id)?;
    let updated = reconciler::refresh_status(&state, &instance).await?;
    Ok(Json(updated))
}

/// GET /instances/{id}/groups/{group_jid}/participants: raw gateway view.
pub async fn group_participants(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, group_jid)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = load_owned_instance(&state, claims.sub, id)?;
    let info = state
        .gateway
        .fetch_group_info(&instance.name, &group_jid)
        .await?;
    Ok(Json(info))
}
