//! Presence tracking derived from connection registry transitions.
//!
//! The registry decides *when* a user came online or went offline; this
//! module owns the last-seen map and the presence broadcasts. A user has a
//! last-seen entry iff they are offline and have connected at least once.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::db::run;
use crate::error::ApiError;
use crate::registry::ConnectionSender;
use crate::state::AppState;
use crate::store::users;
use crate::ws::broadcast::{broadcast_to_all, event_frame};

#[derive(Clone, Default)]
pub struct PresenceTracker {
    last_seen: Arc<DashMap<i64, DateTime<Utc>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the stored last-seen for a reconnecting user. Must happen
    /// before the online broadcast so a racing last-seen query never sees a
    /// stale timestamp for an online user.
    pub fn clear_last_seen(&self, user_id: i64) {
        self.last_seen.remove(&user_id);
    }

    /// Record the moment a user's last connection went away.
    pub fn record_last_seen(&self, user_id: i64) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_seen.insert(user_id, now);
        now
    }

    pub fn last_seen(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.last_seen.get(&user_id).map(|entry| *entry.value())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusChanged {
    user_id: i64,
    is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_seen: Option<String>,
}

/// Broadcast a user's came-online transition plus a fresh online-ids
/// snapshot to every connection. Best-effort.
pub fn user_online(state: &AppState, user_id: i64) {
    state.presence.clear_last_seen(user_id);

    broadcast_to_all(
        &state.registry,
        "userStatusChanged",
        &UserStatusChanged {
            user_id,
            is_online: true,
            last_seen: None,
        },
    );
    broadcast_to_all(&state.registry, "onlineUsers", &state.registry.online_user_ids());
}

/// Broadcast a user's went-offline transition with their last-seen stamp.
pub fn user_offline(state: &AppState, user_id: i64) {
    let last_seen = state.presence.record_last_seen(user_id);

    broadcast_to_all(
        &state.registry,
        "userStatusChanged",
        &UserStatusChanged {
            user_id,
            is_online: false,
            last_seen: Some(last_seen.to_rfc3339()),
        },
    );
    broadcast_to_all(&state.registry, "onlineUsers", &state.registry.online_user_ids());
}

/// Send the current online-ids snapshot to one freshly connected client.
pub fn send_snapshot(state: &AppState, tx: &ConnectionSender) {
    if let Some(msg) = event_frame("onlineUsers", &state.registry.online_user_ids()) {
        let _ = tx.send(msg);
    }
}

// --- REST endpoint handlers ---

/// GET /api/presence/online — ids of all users with a live connection.
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<i64>> {
    Json(state.registry.online_user_ids())
}

#[derive(Serialize)]
pub struct LastSeenResponse {
    pub user_id: i64,
    pub is_online: bool,
    /// RFC 3339, null while the user is online or has never connected.
    pub last_seen: Option<String>,
}

/// GET /api/presence/last-seen/{user_id}
pub async fn last_seen(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<LastSeenResponse>, ApiError> {
    run(&state.db, move |conn| {
        if !users::user_exists(conn, user_id)? {
            return Err(ApiError::NotFound("user not found"));
        }
        Ok(())
    })
    .await?;

    Ok(Json(LastSeenResponse {
        user_id,
        is_online: state.registry.is_online(user_id),
        last_seen: state
            .presence
            .last_seen(user_id)
            .map(|stamp| stamp.to_rfc3339()),
    }))
}
