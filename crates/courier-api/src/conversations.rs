use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::error;

use courier_db::Database;
use courier_types::api::{ConversationPage, PageQuery, SearchQuery, SuccessResponse};
use courier_types::models::{ConversationId, StoredMessage};

use crate::boundary::Boundary;

/// Upper bound on any page size a client can ask for.
const MAX_PAGE: u32 = 200;

/// Run a store call off the async runtime.
async fn with_db<F, T>(boundary: &Boundary, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = boundary.db().clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Store query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub async fn list_conversations(
    State(boundary): State<Boundary>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ConversationPage>, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let offset = query.offset;

    let page = with_db(&boundary, move |db| {
        let conversations = db.get_conversations(limit, offset)?;
        let total = db.count_conversations()?;
        let has_more = u64::from(offset) + (conversations.len() as u64) < total;
        Ok(ConversationPage {
            conversations,
            total,
            has_more,
        })
    })
    .await?;

    Ok(Json(page))
}

pub async fn mark_read(
    State(boundary): State<Boundary>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<SuccessResponse>, StatusCode> {
    let found = with_db(&boundary, move |db| db.mark_conversation_read(conversation_id)).await?;
    if !found {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn get_messages(
    State(boundary): State<Boundary>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let offset = query.offset;

    let messages = with_db(&boundary, move |db| {
        if db.get_conversation(conversation_id)?.is_none() {
            return Ok(None);
        }
        db.get_messages(conversation_id, limit, offset).map(Some)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(messages))
}

pub async fn search_messages(
    State(boundary): State<Boundary>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let term = query.q.trim().to_string();
    if term.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query.limit.clamp(1, MAX_PAGE);

    let messages =
        with_db(&boundary, move |db| db.search_messages(conversation_id, &term, limit)).await?;
    Ok(Json(messages))
}
