//! Inbound event decoding and dispatch.
//!
//! The wire format is a tagged-JSON envelope: {"event": ..., "data": ...,
//! "requestId"?: ...}. Each event has an explicit payload schema validated
//! here before anything reaches the services. Field names on the wire are
//! camelCase.

use serde::Deserialize;
use serde_json::Value;

use crate::call::signaling;
use crate::chat::service;
use crate::db::models::{CallStatus, CallType};
use crate::error::ApiError;
use crate::registry::ConnectionSender;
use crate::state::AppState;
use crate::ws::broadcast::event_frame;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    request_id: Option<String>,
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    sender_id: i64,
    receiver_id: i64,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkAsReadPayload {
    from_user_id: i64,
    to_user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdPayload {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactPayload {
    message_id: i64,
    emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartCallPayload {
    caller_id: i64,
    receiver_id: i64,
    call_type: CallType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptCallPayload {
    call_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndCallPayload {
    call_id: i64,
    status: CallStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    target_user_id: i64,
    offer: Value,
    #[serde(default)]
    call_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    target_user_id: i64,
    answer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceCandidatePayload {
    target_user_id: i64,
    candidate: Value,
}

/// Handle one inbound text frame from an authenticated connection.
/// Frames from a single connection are processed in arrival order — the
/// reader loop awaits this before taking the next frame.
pub async fn handle_text_message(text: &str, tx: &ConnectionSender, state: &AppState, user_id: i64) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::debug!(user_id, error = %err, "undecodable frame");
            send_error(tx, None, &ApiError::InvalidRequest("malformed envelope"));
            return;
        }
    };

    let request_id = envelope.request_id.clone();
    if let Err(err) = dispatch(envelope, tx, state, user_id).await {
        if !err.is_benign() {
            send_error(tx, request_id.as_deref(), &err);
        }
    }
}

async fn dispatch(
    envelope: Envelope,
    tx: &ConnectionSender,
    state: &AppState,
    user_id: i64,
) -> Result<(), ApiError> {
    match envelope.event.as_str() {
        "sendMessage" => {
            let payload: SendMessagePayload = decode(envelope.data)?;
            // The wire carries the sender id, but only the connection's own
            // identity may send.
            if payload.sender_id != user_id {
                return Err(ApiError::InvalidRequest("senderId must match the connection identity"));
            }
            let view =
                service::send(state, payload.sender_id, payload.receiver_id, payload.content)
                    .await?;
            // Ack to the invoking connection only; fan-out already reached
            // both parties' other sessions.
            if let Some(msg) = event_frame("messageSent", &view) {
                let _ = tx.send(msg);
            }
            Ok(())
        }
        "markAsRead" => {
            let payload: MarkAsReadPayload = decode(envelope.data)?;
            // Only the reader can assert their own reads.
            if payload.to_user_id != user_id {
                return Err(ApiError::InvalidRequest("toUserId must match the connection identity"));
            }
            service::mark_as_read(state, payload.from_user_id, payload.to_user_id).await?;
            Ok(())
        }
        "revokeMessage" => {
            let payload: MessageIdPayload = decode(envelope.data)?;
            service::revoke(state, payload.message_id, user_id).await
        }
        "reactToMessage" => {
            let payload: ReactPayload = decode(envelope.data)?;
            service::react(state, payload.message_id, user_id, payload.emoji).await?;
            Ok(())
        }
        "removeReaction" => {
            let payload: MessageIdPayload = decode(envelope.data)?;
            service::remove_reaction(state, payload.message_id, user_id).await?;
            Ok(())
        }
        "start-call" => {
            let payload: StartCallPayload = decode(envelope.data)?;
            if payload.caller_id != user_id {
                return Err(ApiError::InvalidRequest("callerId must match the connection identity"));
            }
            signaling::start_call(state, payload.caller_id, payload.receiver_id, payload.call_type)
                .await
        }
        "accept-call" => {
            let payload: AcceptCallPayload = decode(envelope.data)?;
            signaling::accept_call(state, payload.call_id).await
        }
        "end-call" => {
            let payload: EndCallPayload = decode(envelope.data)?;
            signaling::end_call(state, payload.call_id, payload.status).await
        }
        "offer" => {
            let payload: OfferPayload = decode(envelope.data)?;
            signaling::relay_offer(
                state,
                user_id,
                payload.target_user_id,
                payload.offer,
                payload.call_id,
            );
            Ok(())
        }
        "answer" => {
            let payload: AnswerPayload = decode(envelope.data)?;
            signaling::relay_answer(state, user_id, payload.target_user_id, payload.answer);
            Ok(())
        }
        "ice-candidate" => {
            let payload: IceCandidatePayload = decode(envelope.data)?;
            signaling::relay_ice_candidate(state, user_id, payload.target_user_id, payload.candidate);
            Ok(())
        }
        other => {
            tracing::debug!(user_id, event = other, "unknown event");
            Err(ApiError::InvalidRequest("unknown event"))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|err| {
        tracing::debug!(error = %err, "payload failed validation");
        ApiError::InvalidRequest("invalid payload")
    })
}

/// Emit the `error` event to the invoking connection.
pub fn send_error(tx: &ConnectionSender, request_id: Option<&str>, err: &ApiError) {
    let data = serde_json::json!({
        "code": err.ws_code(),
        "message": err.to_string(),
        "requestId": request_id,
    });
    if let Some(msg) = event_frame("error", &data) {
        let _ = tx.send(msg);
    }
}
