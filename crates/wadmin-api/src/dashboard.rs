use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{Duration, Utc};
use serde_json::json;

use wadmin_types::api::{Claims, DashboardStats};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /dashboard: counts over the caller's records plus the cached
/// gateway reachability.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let hour_ago = Utc::now() - Duration::hours(1);
    let (gateway_status, gateway_checked_at) = state.reachability.snapshot().await;

    Ok(Json(DashboardStats {
        total_instances: state.db.count_instances(user)?,
        connected_instances: state.db.count_connected_instances(user)?,
        total_groups: state.db.count_groups(user)?,
        total_messages: state.db.count_messages(user)?,
        messages_last_hour: state.db.count_messages_since(user, hour_ago)?,
        gateway_status,
        gateway_checked_at,
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "realtime_connections": state.feed.connection_count().await,
    }))
}
