//! Maps the gateway's raw connection state onto [`InstanceStatus`].
//!
//! Runs only when an operator asks for a refresh. Nothing polls instances
//! in the background, so a session that drops stays `connected` locally
//! until the next refresh.

use chrono::Utc;
use tracing::info;

use wadmin_types::events::{ChangeAction, Collection};
use wadmin_types::models::{Instance, InstanceStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// `"open"` is connected, `"close"` is disconnected, anything else
/// (including no state at all) means a QR scan is needed.
pub fn map_connection_state(state: Option<&str>) -> InstanceStatus {
    match state {
        Some("open") => InstanceStatus::Connected,
        Some("close") => InstanceStatus::Disconnected,
        _ => InstanceStatus::QrNeeded,
    }
}

/// Ask the gateway for the instance's state and persist the mapped status.
/// Only a transition into `connected` stamps `last_connected_at`.
pub async fn refresh_status(state: &AppState, instance: &Instance) -> Result<Instance, ApiError> {
    let remote = state.gateway.get_instance_status(&instance.name).await?;
    let status = map_connection_state(remote.state.as_deref());

    let now = Utc::now();
    let stamp = (status == InstanceStatus::Connected).then_some(now);
    let updated = state
        .db
        .update_instance_status(instance.id, status, now, stamp)?
        .ok_or(ApiError::NotFound("instance"))?;

    if instance.status != status {
        info!(
            "Instance {} went {} -> {}",
            instance.name,
            instance.status.as_str(),
            status.as_str()
        );
    }

    state.publish(
        Collection::Instances,
        ChangeAction::Updated,
        updated.id,
        Some(updated.user_id),
        Some(&updated),
    );
    Ok(updated)
}
