use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::chat::routes as chat_routes;
use crate::db::run;
use crate::error::ApiError;
use crate::notify;
use crate::presence;
use crate::state::AppState;
use crate::store::users;
use crate::ws::handler as ws_handler;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// POST /api/users — provisioning seam for the external identity system.
/// Messages, calls, and notifications need user ids to reference; nothing
/// else about a profile lives here.
async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    if body.display_name.trim().is_empty() {
        return Err(ApiError::InvalidRequest("display_name must not be empty"));
    }
    let row = run(&state.db, move |conn| {
        Ok(users::create_user(
            conn,
            &body.display_name,
            body.avatar_url.as_deref(),
        )?)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: row.id,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
        }),
    ))
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    let user_routes = Router::new().route("/api/users", axum::routing::post(create_user));

    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(chat_routes::send_message))
        .route("/api/messages", axum::routing::get(chat_routes::get_messages))
        .route(
            "/api/messages/unread-count",
            axum::routing::get(chat_routes::unread_count),
        )
        .route("/api/messages/read", axum::routing::post(chat_routes::mark_read))
        .route(
            "/api/messages/{id}/forward",
            axum::routing::post(chat_routes::forward_message),
        )
        .route(
            "/api/messages/{id}/delete-for-me",
            axum::routing::post(chat_routes::delete_for_me),
        );

    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            axum::routing::get(chat_routes::list_conversations),
        )
        .route(
            "/api/conversations/{other_id}",
            axum::routing::delete(chat_routes::delete_conversation),
        );

    let block_routes = Router::new()
        .route("/api/blocks", axum::routing::post(chat_routes::create_block))
        .route("/api/blocks", axum::routing::delete(chat_routes::delete_block))
        .route("/api/blocks/status", axum::routing::get(chat_routes::block_status));

    let presence_routes = Router::new()
        .route("/api/presence/online", axum::routing::get(presence::online_users))
        .route(
            "/api/presence/last-seen/{user_id}",
            axum::routing::get(presence::last_seen),
        );

    let notification_routes = Router::new()
        .route(
            "/api/notifications/user",
            axum::routing::post(notify::post_user_notification),
        )
        .route(
            "/api/notifications/global",
            axum::routing::post(notify::post_global_notification),
        )
        .route(
            "/api/notifications",
            axum::routing::get(notify::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            axum::routing::post(notify::mark_all_notifications_read),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::post(notify::mark_notification_read),
        )
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(notify::delete_notification),
        );

    // WebSocket endpoint (identity via query param)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(user_routes)
        .merge(message_routes)
        .merge(conversation_routes)
        .merge(block_routes)
        .merge(presence_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
