use axum::extract::ws::Message;
use serde::Serialize;

use crate::registry::ConnectionRegistry;

/// Build a tagged-JSON event frame: {"event": ..., "data": ...}.
/// Returns None only if the payload fails to serialize.
pub fn event_frame(event: &str, data: &impl Serialize) -> Option<Message> {
    let body = serde_json::json!({ "event": event, "data": data });
    match serde_json::to_string(&body) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(err) => {
            tracing::error!(event = event, error = %err, "failed to encode event frame");
            None
        }
    }
}

/// Send an event to every live connection of one user.
///
/// Best-effort: a closed channel is skipped, the rest still receive the
/// frame. An offline user simply has no senders.
pub fn send_to_user(registry: &ConnectionRegistry, user_id: i64, event: &str, data: &impl Serialize) {
    let Some(msg) = event_frame(event, data) else {
        return;
    };
    for sender in registry.senders_for(user_id) {
        let _ = sender.send(msg.clone());
    }
}

/// Send an event to every connection on the server.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &str, data: &impl Serialize) {
    let Some(msg) = event_frame(event, data) else {
        return;
    };
    for sender in registry.all_senders() {
        let _ = sender.send(msg.clone());
    }
}
