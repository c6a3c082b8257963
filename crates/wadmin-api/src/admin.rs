//! System log and feedback views. Both are shared across operators, so
//! their change events carry no owner and reach every connection.
//!
//! Any operator may append a log entry or submit feedback. Reading logs and
//! triaging feedback is for admins.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use wadmin_types::api::{
    Claims, CreateFeedbackRequest, CreateLogRequest, LogQuery, Page, PageQuery,
    UpdateFeedbackRequest,
};
use wadmin_types::events::{ChangeAction, Collection};
use wadmin_types::models::{FeedbackStatus, SystemLog, UserFeedback};

use crate::error::ApiError;
use crate::middleware::require_admin;
use crate::state::AppState;

const LOG_PAGE_SIZE: u32 = 50;
const FEEDBACK_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

fn require_text(text: &str, what: &str) -> Result<String, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        Err(ApiError::Validation(format!("{what} must not be empty")))
    } else {
        Ok(text.to_string())
    }
}

// -- System logs --

pub async fn list_logs(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    let paging = query.paging();
    let (limit, offset) = paging.limit_offset(LOG_PAGE_SIZE, MAX_PAGE_SIZE);
    let (items, total) = state.db.list_logs(query.kind, limit, offset)?;

    Ok(Json(Page {
        items,
        total,
        page: paging.page.max(1),
        page_size: limit,
    }))
}

/// POST /logs: diagnostic entries from the console itself.
pub async fn create_log(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateLogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let log = SystemLog {
        id: Uuid::new_v4(),
        kind: req.kind,
        message: require_text(&req.message, "message")?,
        details: req.details,
        user_id: Some(claims.sub),
        instance_id: req.instance_id,
        created_at: Utc::now(),
    };
    state.db.insert_log(&log)?;

    state.publish(
        Collection::SystemLogs,
        ChangeAction::Created,
        log.id,
        None,
        Some(&log),
    );
    Ok((StatusCode::CREATED, Json(log)))
}

// -- Feedback --

pub async fn list_feedback(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = query.limit_offset(FEEDBACK_PAGE_SIZE, MAX_PAGE_SIZE);
    let (items, total) = state.db.list_feedback(limit, offset)?;

    Ok(Json(Page {
        items,
        total,
        page: query.page.max(1),
        page_size: limit,
    }))
}

pub async fn create_feedback(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let feedback = UserFeedback {
        id: Uuid::new_v4(),
        user_id: claims.sub,
        message: require_text(&req.message, "feedback")?,
        kind: req.kind,
        status: FeedbackStatus::New,
        created_at: Utc::now(),
    };
    state.db.insert_feedback(&feedback)?;

    state.publish(
        Collection::UserFeedback,
        ChangeAction::Created,
        feedback.id,
        None,
        Some(&feedback),
    );
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn update_feedback(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    let feedback = state
        .db
        .update_feedback_status(id, req.status)?
        .ok_or(ApiError::NotFound("feedback"))?;

    state.publish(
        Collection::UserFeedback,
        ChangeAction::Updated,
        id,
        None,
        Some(&feedback),
    );
    Ok(Json(feedback))
}

pub async fn delete_feedback(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;
    if !state.db.delete_feedback(id)? {
        return Err(ApiError::NotFound("feedback"));
    }
    state.publish::<UserFeedback>(
        Collection::UserFeedback,
        ChangeAction::Deleted,
        id,
        None,
        None,
    );
    Ok(StatusCode::NO_CONTENT)
}
