use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::db::run;
use crate::state::AppState;
use crate::store::users;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Identity arrives verified by
/// an out-of-band collaborator; the query-string carries the resolved id.
#[derive(Debug, Deserialize)]
pub struct WsIdentityQuery {
    pub user_id: Option<String>,
}

/// WebSocket close codes:
/// 4001 = identity missing
/// 4002 = identity malformed
/// 4004 = unknown user
const CLOSE_IDENTITY_MISSING: u16 = 4001;
const CLOSE_IDENTITY_MALFORMED: u16 = 4002;
const CLOSE_UNKNOWN_USER: u16 = 4004;

/// GET /ws?user_id=<id>
/// WebSocket upgrade endpoint. A connection without a valid, known identity
/// is upgraded and immediately closed with a dedicated close code — it is
/// never registered and is not addressable.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsIdentityQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match params.user_id.as_deref() {
        None | Some("") => {
            return reject(ws, CLOSE_IDENTITY_MISSING, "Missing user id");
        }
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                return reject(ws, CLOSE_IDENTITY_MALFORMED, "Malformed user id");
            }
        },
    };

    let known = run(&state.db, move |conn| Ok(users::user_exists(conn, user_id)?))
        .await
        .unwrap_or(false);
    if !known {
        tracing::warn!(user_id, "WebSocket connection for unknown user");
        return reject(ws, CLOSE_UNKNOWN_USER, "Unknown user");
    }

    tracing::info!(user_id, "WebSocket connection identified");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}

/// Upgrade the connection, then immediately close with the error code.
fn reject(ws: WebSocketUpgrade, close_code: u16, reason: &'static str) -> Response {
    tracing::warn!(close_code, reason, "WebSocket identity check failed");
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
