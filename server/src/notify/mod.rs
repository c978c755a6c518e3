//! Notification fan-out: persist first, then best-effort live push.
//!
//! The stored row is the durable record; the `newNotification` event is a
//! nudge to whoever is connected right now.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::models::NotificationRow;
use crate::db::run;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{notifications, users};
use crate::ws::broadcast::{broadcast_to_all, send_to_user};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub url: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

impl From<NotificationRow> for NotificationView {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            message: row.message,
            url: row.url,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

/// Persist a notification for one user, then push it to their connections.
pub async fn notify_user(
    state: &AppState,
    user_id: i64,
    message: String,
    url: Option<String>,
) -> Result<NotificationView, ApiError> {
    let row = run(&state.db, move |conn| {
        if !users::user_exists(conn, user_id)? {
            return Err(ApiError::NotFound("user not found"));
        }
        Ok(notifications::insert_notification(
            conn,
            Some(user_id),
            &message,
            url.as_deref(),
        )?)
    })
    .await?;

    let view = NotificationView::from(row);
    send_to_user(&state.registry, user_id, "newNotification", &view);
    Ok(view)
}

/// Persist a global notification, then push it to every connection.
pub async fn notify_all(
    state: &AppState,
    message: String,
    url: Option<String>,
) -> Result<NotificationView, ApiError> {
    let row = run(&state.db, move |conn| {
        Ok(notifications::insert_notification(
            conn,
            None,
            &message,
            url.as_deref(),
        )?)
    })
    .await?;

    let view = NotificationView::from(row);
    broadcast_to_all(&state.registry, "newNotification", &view);
    Ok(view)
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
pub struct NotifyUserRequest {
    pub user_id: i64,
    pub message: String,
    pub url: Option<String>,
}

/// POST /api/notifications/user
pub async fn post_user_notification(
    State(state): State<AppState>,
    Json(body): Json<NotifyUserRequest>,
) -> Result<(StatusCode, Json<NotificationView>), ApiError> {
    let view = notify_user(&state, body.user_id, body.message, body.url).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct NotifyAllRequest {
    pub message: String,
    pub url: Option<String>,
}

/// POST /api/notifications/global
pub async fn post_global_notification(
    State(state): State<AppState>,
    Json(body): Json<NotifyAllRequest>,
) -> Result<(StatusCode, Json<NotificationView>), ApiError> {
    let view = notify_all(&state, body.message, body.url).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

/// GET /api/notifications?user_id= — newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let user_id = query.user_id;
    let rows = run(&state.db, move |conn| {
        Ok(notifications::list_for_user(conn, user_id)?)
    })
    .await?;
    Ok(Json(rows.into_iter().map(NotificationView::from).collect()))
}

/// POST /api/notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let found = run(&state.db, move |conn| Ok(notifications::mark_read(conn, id)?)).await?;
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("notification not found"))
    }
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

/// POST /api/notifications/read-all
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Json(body): Json<UserQuery>,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let user_id = body.user_id;
    let updated = run(&state.db, move |conn| {
        Ok(notifications::mark_all_read(conn, user_id)?)
    })
    .await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let found = run(&state.db, move |conn| {
        Ok(notifications::delete_notification(conn, id)?)
    })
    .await?;
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("notification not found"))
    }
}
