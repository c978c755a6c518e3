//! Companion REST surface for messaging: history, conversations, unread
//! counts, forwarding, tombstones, and block management.
//!
//! Request bodies and query params are snake_case; message payloads reuse
//! the camelCase wire views so REST and WS clients see one message shape.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::chat::service::{self, ConversationsResponse, MessageView};
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
}

/// POST /api/messages — send a message (same semantics as WS `sendMessage`).
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let view = service::send(&state, body.sender_id, body.receiver_id, body.content).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: i64,
    pub other_id: i64,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /api/messages — paginated history between two users, newest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let page =
        service::messages_between(&state, query.user_id, query.other_id, limit, offset).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub user_id: i64,
    pub unread_count: i64,
}

/// GET /api/messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread_count = service::total_unread(&state, query.user_id).await?;
    Ok(Json(UnreadCountResponse {
        user_id: query.user_id,
        unread_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ForwardRequest {
    pub sender_id: i64,
    pub receiver_id: i64,
}

/// POST /api/messages/{id}/forward
pub async fn forward_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Json(body): Json<ForwardRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let view = service::forward(&state, message_id, body.sender_id, body.receiver_id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteForMeRequest {
    pub user_id: i64,
}

/// POST /api/messages/{id}/delete-for-me — per-side tombstone, idempotent.
pub async fn delete_for_me(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Json(body): Json<DeleteForMeRequest>,
) -> Result<StatusCode, ApiError> {
    service::delete_for_me(&state, message_id, body.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub from_user_id: i64,
    pub to_user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

/// POST /api/messages/read — REST twin of the WS `markAsRead` event.
pub async fn mark_read(
    State(state): State<AppState>,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = service::mark_as_read(&state, body.from_user_id, body.to_user_id).await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// GET /api/conversations — summaries plus unread counts for one user.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let response = service::conversations(&state, query.user_id).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct DeleteConversationResponse {
    pub updated: usize,
}

/// DELETE /api/conversations/{other_id}?user_id= — one-side bulk tombstone.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Json<DeleteConversationResponse>, ApiError> {
    let updated = service::delete_conversation(&state, query.user_id, other_id).await?;
    Ok(Json(DeleteConversationResponse { updated }))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub blocker_id: i64,
    pub blocked_id: i64,
}

#[derive(Debug, Serialize)]
pub struct BlockResponse {
    pub changed: bool,
}

/// POST /api/blocks — idempotent create.
pub async fn create_block(
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<BlockResponse>, ApiError> {
    let changed = service::block(&state, body.blocker_id, body.blocked_id).await?;
    Ok(Json(BlockResponse { changed }))
}

/// DELETE /api/blocks — idempotent delete.
pub async fn delete_block(
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<BlockResponse>, ApiError> {
    let changed = service::unblock(&state, body.blocker_id, body.blocked_id).await?;
    Ok(Json(BlockResponse { changed }))
}

#[derive(Debug, Deserialize)]
pub struct BlockStatusQuery {
    pub user_id: i64,
    pub other_id: i64,
}

#[derive(Debug, Serialize)]
pub struct BlockStatusResponse {
    pub blocked: bool,
    pub blocked_by: Option<i64>,
}

/// GET /api/blocks/status — whether a block exists and who created it.
pub async fn block_status(
    State(state): State<AppState>,
    Query(query): Query<BlockStatusQuery>,
) -> Result<Json<BlockStatusResponse>, ApiError> {
    let blocked_by = service::block_status(&state, query.user_id, query.other_id).await?;
    Ok(Json(BlockStatusResponse {
        blocked: blocked_by.is_some(),
        blocked_by,
    }))
}
