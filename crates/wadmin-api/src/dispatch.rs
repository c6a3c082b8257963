//! Send and join orchestration against the workflow webhook.
//!
//! Both operations refuse to leave the process unless the target instance
//! is `connected`. The workflow receives the whole batch in one call, and
//! local records are written only once it accepts. A rejected batch leaves
//! an `error` entry in the system log, written from a detached task.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use wadmin_types::api::{
    Claims, FailedRecord, JoinGroupsRequest, JoinGroupsResponse, SendMessagesRequest,
    SendMessagesResponse,
};
use wadmin_types::events::{ChangeAction, Collection};
use wadmin_types::models::{Group, Instance, LogKind, Message, MessageStatus, SystemLog};
use wadmin_upstream::{JoinGroupPayload, SendMessagePayload, UpstreamError};

use crate::error::ApiError;
use crate::registry::resolve_target;
use crate::state::AppState;

pub const DEFAULT_DELAY_MIN: u32 = 5;
pub const DEFAULT_DELAY_MAX: u32 = 10;

fn require_connected(instance: &Instance) -> Result<(), ApiError> {
    if instance.status.allows_dispatch() {
        Ok(())
    } else {
        Err(ApiError::Precondition(format!(
            "instance must be connected (currently {})",
            instance.status.as_str()
        )))
    }
}

/// Reject an empty list or one with a blank entry.
fn require_entries(items: &[String], what: &str) -> Result<(), ApiError> {
    if items.is_empty() {
        return Err(ApiError::Validation(format!("at least one {what} is required")));
    }
    if items.iter().any(|s| s.trim().is_empty()) {
        return Err(ApiError::Validation(format!("{what} must not be blank")));
    }
    Ok(())
}

/// Identifiers (phone numbers, group ids, invite codes) lose stray
/// whitespace. Message bodies never go through here.
fn clean_list(items: &[String], what: &str) -> Result<Vec<String>, ApiError> {
    require_entries(items, what)?;
    Ok(items.iter().map(|s| s.trim().to_string()).collect())
}

/// Record the rejection in the system log without holding up the response.
fn log_failure(
    state: &AppState,
    user_id: Uuid,
    instance_id: Uuid,
    message: &'static str,
    err: &UpstreamError,
) {
    let state = state.clone();
    let log = SystemLog {
        id: Uuid::new_v4(),
        kind: LogKind::Error,
        message: message.to_string(),
        details: Some(err.to_string()),
        user_id: Some(user_id),
        instance_id: Some(instance_id),
        created_at: Utc::now(),
    };

    tokio::spawn(async move {
        match state.db.insert_log(&log) {
            Ok(()) => state.publish(
                Collection::SystemLogs,
                ChangeAction::Created,
                log.id,
                None,
                Some(&log),
            ),
            Err(e) => warn!("Could not record dispatch failure: {:#}", e),
        }
    });
}

/// Hand every (body, target) pair to the workflow, then record one `sent`
/// message per pair, body-major.
pub async fn send_messages(
    state: &AppState,
    user_id: Uuid,
    instance: &Instance,
    req: &SendMessagesRequest,
) -> Result<SendMessagesResponse, ApiError> {
    require_connected(instance)?;

    require_entries(&req.messages, "message")?;
    let bodies = req.messages.clone();
    let targets = clean_list(&req.targets, "target")?;
    let delay_min = req.delay_min.unwrap_or(DEFAULT_DELAY_MIN);
    let delay_max = req.delay_max.unwrap_or(DEFAULT_DELAY_MAX);
    if delay_min > delay_max {
        return Err(ApiError::Validation(
            "delay_min must not exceed delay_max".into(),
        ));
    }

    let payload = SendMessagePayload {
        instance: instance.name.clone(),
        messages: bodies,
        targets,
        is_group: req.is_group,
        delay_min,
        delay_max,
    };

    if let Err(e) = state.workflow.send_messages(&payload).await {
        log_failure(state, user_id, instance.id, "failed to send messages", &e);
        return Err(e.into());
    }

    let now = Utc::now();
    let mut recorded = 0;
    let mut failed_records = Vec::new();

    for text in &payload.messages {
        for target in &payload.targets {
            let message = Message {
                id: Uuid::new_v4(),
                text: text.clone(),
                target: target.clone(),
                is_group: payload.is_group,
                instance_id: instance.id,
                user_id,
                status: MessageStatus::Sent,
                sent_at: Some(now),
                error: None,
                created_at: now,
            };

            match state.db.insert_message(&message) {
                Ok(()) => {
                    recorded += 1;
                    state.publish(
                        Collection::Messages,
                        ChangeAction::Created,
                        message.id,
                        Some(user_id),
                        Some(&message),
                    );
                }
                Err(e) => {
                    warn!("Message to {} sent but not recorded: {:#}", target, e);
                    failed_records.push(FailedRecord {
                        text: Some(text.clone()),
                        target: target.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "Dispatched {} message(s) via {} ({} unrecorded)",
        recorded,
        instance.name,
        failed_records.len()
    );

    Ok(SendMessagesResponse {
        instance_id: instance.id,
        recorded,
        failed_records,
    })
}

/// Ask the workflow to join every invite, then record one group per code
/// named by its position. Whatever metadata the workflow returns is ignored.
pub async fn join_groups(
    state: &AppState,
    user_id: Uuid,
    instance: &Instance,
    invite_codes: &[String],
) -> Result<JoinGroupsResponse, ApiError> {
    require_connected(instance)?;
    let codes = clean_list(invite_codes, "invite code")?;

    let payload = JoinGroupPayload {
        instance: instance.name.clone(),
        invite_codes: codes,
    };

    if let Err(e) = state.workflow.join_groups(&payload).await {
        log_failure(state, user_id, instance.id, "failed to join groups", &e);
        return Err(e.into());
    }

    let now = Utc::now();
    let mut groups = Vec::with_capacity(payload.invite_codes.len());
    let mut failed_records = Vec::new();

    for (i, code) in payload.invite_codes.iter().enumerate() {
        let group = Group {
            id: Uuid::new_v4(),
            group_id: code.clone(),
            name: format!("Grupo {}", i + 1),
            invite_code: code.clone(),
            is_member: true,
            instance_id: instance.id,
            user_id,
            joined_at: Some(now),
            created_at: now,
        };

        match state.db.insert_group(&group) {
            Ok(()) => {
                state.publish(
                    Collection::Groups,
                    ChangeAction::Created,
                    group.id,
                    Some(user_id),
                    Some(&group),
                );
                groups.push(group);
            }
            Err(e) => {
                warn!("Joined {} but could not record it: {:#}", code, e);
                failed_records.push(FailedRecord {
                    text: None,
                    target: code.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!("Joined {} group(s) via {}", groups.len(), instance.name);

    Ok(JoinGroupsResponse {
        instance_id: instance.id,
        groups,
        failed_records,
    })
}

// -- Handlers --

pub async fn send_messages_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = resolve_target(&state, claims.sub, req.instance_id).await?;
    let resp = send_messages(&state, claims.sub, &instance, &req).await?;
    Ok(Json(resp))
}

pub async fn join_groups_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinGroupsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let instance = resolve_target(&state, claims.sub, req.instance_id).await?;
    let resp = join_groups(&state, claims.sub, &instance, &req.invite_codes).await?;
    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{eventually, seed_instance, seed_user, test_state};
    use wadmin_types::models::InstanceStatus;

    fn batch(messages: &[&str], targets: &[&str]) -> SendMessagesRequest {
        SendMessagesRequest {
            instance_id: None,
            messages: messages.iter().map(|s| s.to_string()).collect(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
            is_group: false,
            delay_min: None,
            delay_max: None,
        }
    }

    #[tokio::test]
    async fn non_connected_instances_never_reach_the_workflow() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);

        for (i, status) in [
            InstanceStatus::Disconnected,
            InstanceStatus::QrNeeded,
            InstanceStatus::Connecting,
            InstanceStatus::Error,
        ]
        .into_iter()
        .enumerate()
        {
            let inst = seed_instance(&state, user, &format!("inst{i}"), status);

            let err = send_messages(&state, user, &inst, &batch(&["hi"], &["+1"]))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Precondition(_)));

            let err = join_groups(&state, user, &inst, &["abc".to_string()])
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Precondition(_)));
        }

        assert_eq!(workflow.call_count(), 0);
    }

    #[tokio::test]
    async fn every_body_goes_to_every_target() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);

        let resp = send_messages(&state, user, &inst, &batch(&["hi", "yo"], &["+1", "+2"]))
            .await
            .unwrap();
        assert_eq!(resp.recorded, 4);
        assert!(resp.failed_records.is_empty());

        let sends = workflow.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].instance, "main");
        assert_eq!((sends[0].delay_min, sends[0].delay_max), (5, 10));
        drop(sends);

        let (stored, total) = state.db.list_messages(user, Some(inst.id), 10, 0).unwrap();
        assert_eq!(total, 4);
        assert!(stored.iter().all(|m| m.status == MessageStatus::Sent));
        assert!(stored.iter().all(|m| m.sent_at.is_some()));

        let mut pairs: Vec<_> = stored.iter().map(|m| (m.text.as_str(), m.target.as_str())).collect();
        pairs.sort();
        assert_eq!(pairs, vec![("hi", "+1"), ("hi", "+2"), ("yo", "+1"), ("yo", "+2")]);
    }

    #[tokio::test]
    async fn invalid_batches_are_rejected_locally() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);

        let empty = send_messages(&state, user, &inst, &batch(&[], &["+1"])).await;
        assert!(matches!(empty, Err(ApiError::Validation(_))));

        let blank = send_messages(&state, user, &inst, &batch(&["hi"], &["  "])).await;
        assert!(matches!(blank, Err(ApiError::Validation(_))));

        let mut inverted = batch(&["hi"], &["+1"]);
        inverted.delay_min = Some(20);
        inverted.delay_max = Some(3);
        let inverted = send_messages(&state, user, &inst, &inverted).await;
        assert!(matches!(inverted, Err(ApiError::Validation(_))));

        assert_eq!(workflow.call_count(), 0);
    }

    #[tokio::test]
    async fn joined_groups_are_named_by_position() {
        let (state, _, _) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);
        let codes: Vec<String> = ["AAA", "BBB", "CCC"].iter().map(|s| s.to_string()).collect();

        let resp = join_groups(&state, user, &inst, &codes).await.unwrap();
        let names: Vec<_> = resp.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Grupo 1", "Grupo 2", "Grupo 3"]);
        assert!(resp.groups.iter().all(|g| g.is_member && g.group_id == g.invite_code));
        assert_eq!(resp.groups[1].invite_code, "BBB");

        assert_eq!(state.db.list_groups(user, Some(inst.id)).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn workflow_failure_is_logged_and_records_nothing() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);
        workflow.fail.store(true, Ordering::SeqCst);

        let err = send_messages(&state, user, &inst, &batch(&["hi"], &["+1"]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "workflow rejected batch");
        assert_eq!(state.db.count_messages(user).unwrap(), 0);

        let logged = eventually(|| {
            let (logs, _) = state.db.list_logs(Some(LogKind::Error), 10, 0).unwrap();
            logs.iter().any(|l| {
                l.message == "failed to send messages"
                    && l.instance_id == Some(inst.id)
                    && l.details.as_deref() == Some("workflow rejected batch")
            })
        })
        .await;
        assert!(logged);
    }

    #[tokio::test]
    async fn bodies_are_sent_and_recorded_verbatim() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);

        let resp = send_messages(&state, user, &inst, &batch(&["\n  Hello,\nworld  "], &[" +1 "]))
            .await
            .unwrap();
        assert_eq!(resp.recorded, 1);

        let sends = workflow.sends.lock().unwrap();
        assert_eq!(sends[0].messages, vec!["\n  Hello,\nworld  ".to_string()]);
        assert_eq!(sends[0].targets, vec!["+1".to_string()]);
        drop(sends);

        let (stored, _) = state.db.list_messages(user, None, 10, 0).unwrap();
        assert_eq!(stored[0].text, "\n  Hello,\nworld  ");
    }

    #[tokio::test]
    async fn unrecorded_messages_are_reported_not_rolled_back() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);
        state
            .db
            .with_conn_mut(|conn| {
                conn.execute_batch("DROP TABLE messages")?;
                Ok(())
            })
            .unwrap();

        let resp = send_messages(&state, user, &inst, &batch(&["hi", "yo"], &["+1", "+2"]))
            .await
            .unwrap();
        assert_eq!(workflow.sends.lock().unwrap().len(), 1);
        assert_eq!(resp.recorded, 0);
        assert_eq!(resp.failed_records.len(), 4);
        assert_eq!(resp.failed_records[0].text.as_deref(), Some("hi"));
        assert_eq!(resp.failed_records[0].target, "+1");
        assert_eq!(resp.failed_records[3].text.as_deref(), Some("yo"));
        assert_eq!(resp.failed_records[3].target, "+2");
    }

    #[tokio::test]
    async fn unrecorded_groups_are_reported() {
        let (state, _, _) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);
        state
            .db
            .with_conn_mut(|conn| {
                conn.execute_batch("DROP TABLE groups")?;
                Ok(())
            })
            .unwrap();

        let codes = vec!["AAA".to_string(), "BBB".to_string()];
        let resp = join_groups(&state, user, &inst, &codes).await.unwrap();
        assert!(resp.groups.is_empty());
        let failed: Vec<_> = resp.failed_records.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(failed, vec!["AAA", "BBB"]);
        assert!(resp.failed_records.iter().all(|f| f.text.is_none()));
    }

    #[tokio::test]
    async fn join_failure_is_logged() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let inst = seed_instance(&state, user, "main", InstanceStatus::Connected);
        workflow.fail.store(true, Ordering::SeqCst);

        let err = join_groups(&state, user, &inst, &["AAA".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
        assert!(state.db.list_groups(user, None).unwrap().is_empty());

        let logged = eventually(|| {
            let (logs, _) = state.db.list_logs(Some(LogKind::Error), 10, 0).unwrap();
            logs.iter().any(|l| {
                l.message == "failed to join groups"
                    && l.instance_id == Some(inst.id)
                    && l.user_id == Some(user)
                    && l.details.as_deref() == Some("workflow rejected invites")
            })
        })
        .await;
        assert!(logged);
    }

    #[tokio::test]
    async fn handler_without_selection_is_precondition_failure() {
        let (state, _, workflow) = test_state();
        let user = seed_user(&state);
        let claims = Claims {
            sub: user,
            username: "op".into(),
            is_admin: false,
            exp: usize::MAX,
        };

        let result = send_messages_handler(
            State(state),
            Extension(claims),
            Json(batch(&["hi"], &["+1"])),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Precondition(_))));
        assert_eq!(workflow.call_count(), 0);
    }
}
