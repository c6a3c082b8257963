use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use wadmin_types::api::{Claims, GroupQuery};
use wadmin_types::events::{ChangeAction, Collection};
use wadmin_types::models::Group;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /groups?instance_id=: groups recorded by joins, newest first.
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let groups = state.db.list_groups(claims.sub, query.instance_id)?;
    Ok(Json(groups))
}

/// DELETE /groups/{id}: forgets the local record only; the instance stays
/// a member on WhatsApp.
pub async fn delete_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state
        .db
        .get_group(id)?
        .filter(|g| g.user_id == claims.sub)
        .ok_or(ApiError::NotFound("group"))?;

    state.db.delete_group(id)?;
    info!("Removed group record {} ({})", group.name, id);

    state.publish::<Group>(
        Collection::Groups,
        ChangeAction::Deleted,
        id,
        Some(group.user_id),
        None,
    );
    Ok(StatusCode::NO_CONTENT)
}
