use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};

use wadmin_types::api::{Claims, MessageQuery, Page};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// GET /messages: the caller's dispatched messages, newest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let paging = query.paging();
    let (limit, offset) = paging.limit_offset(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let (items, total) = state
        .db
        .list_messages(claims.sub, query.instance_id, limit, offset)?;

    Ok(Json(Page {
        items,
        total,
        page: paging.page.max(1),
        page_size: limit,
    }))
}
