//! Call signaling: lifecycle state machine plus the WebRTC relay.
//!
//! The call state machine is `ongoing` → exactly one of ended / missed /
//! rejected / cancelled / busy. Two layers serialize the terminal write:
//! removing the in-memory session picks the single notifier, and the store's
//! conditional update guards the durable transition.

use serde::Serialize;
use std::time::Duration;

use crate::db::models::{CallStatus, CallType};
use crate::db::run;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{calls, users};
use crate::ws::broadcast::send_to_user;

/// Retries for the terminal store write after the live event went out.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallEventPayload {
    call_id: i64,
    caller_id: i64,
    receiver_id: i64,
    call_type: CallType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallEnded {
    call_id: i64,
    status: CallStatus,
    caller_id: i64,
    receiver_id: i64,
    call_type: CallType,
    role: &'static str,
    summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserNotOnline {
    call_id: i64,
    caller_id: i64,
    receiver_id: i64,
    reason: &'static str,
}

fn summary_text(call_type: CallType, status: CallStatus, duration_secs: i64) -> String {
    let label = match call_type {
        CallType::Audio => "Audio",
        CallType::Video => "Video",
    };
    match status {
        CallStatus::Missed => format!("Missed {} call.", label.to_lowercase()),
        _ => format!(
            "{} call ended. Duration: {} min {} sec.",
            label,
            duration_secs / 60,
            duration_secs % 60
        ),
    }
}

/// Start a call. The Call row is created in `ongoing` and then, depending on
/// the receiver's state, either rings (session kept, `incoming-call` out) or
/// is immediately driven to a terminal status (`busy` / `cancelled`).
pub async fn start_call(
    state: &AppState,
    caller_id: i64,
    receiver_id: i64,
    call_type: CallType,
) -> Result<(), ApiError> {
    if caller_id == receiver_id {
        return Err(ApiError::InvalidRequest("cannot call yourself"));
    }

    let call = run(&state.db, move |conn| {
        if !users::user_exists(conn, caller_id)? {
            return Err(ApiError::NotFound("caller not found"));
        }
        if !users::user_exists(conn, receiver_id)? {
            return Err(ApiError::NotFound("receiver not found"));
        }
        Ok(calls::insert_call(conn, caller_id, receiver_id, call_type)?)
    })
    .await?;

    let payload = CallEventPayload {
        call_id: call.id,
        caller_id,
        receiver_id,
        call_type,
    };

    // Only the receiver's busy state matters; a busy caller may dial out.
    if state.calls.is_busy(receiver_id) {
        finish_terminal(state, call.id, CallStatus::Busy, call_type, 0).await?;
        send_to_user(
            &state.registry,
            caller_id,
            "call-ended",
            &CallEnded {
                call_id: call.id,
                status: CallStatus::Busy,
                caller_id,
                receiver_id,
                call_type,
                role: "caller",
                summary: summary_text(call_type, CallStatus::Busy, 0),
            },
        );
        return Ok(());
    }

    if !state.registry.is_online(receiver_id) {
        finish_terminal(state, call.id, CallStatus::Cancelled, call_type, 0).await?;
        send_to_user(
            &state.registry,
            caller_id,
            "user-not-online",
            &UserNotOnline {
                call_id: call.id,
                caller_id,
                receiver_id,
                reason: "user-not-online",
            },
        );
        return Ok(());
    }

    state.calls.insert(call.id, caller_id, receiver_id, call_type);
    send_to_user(&state.registry, receiver_id, "incoming-call", &payload);
    send_to_user(&state.registry, caller_id, "call-started", &payload);
    Ok(())
}

/// Accept a ringing call: both participants enter the busy set. Acceptance
/// is a signaling event only — the stored status stays `ongoing` until
/// end-call.
pub async fn accept_call(state: &AppState, call_id: i64) -> Result<(), ApiError> {
    let session = state
        .calls
        .mark_accepted(call_id)
        .ok_or(ApiError::NotFound("call not found"))?;

    // call_type is fixed at start time; echo the session's, not the payload's
    let payload = CallEventPayload {
        call_id,
        caller_id: session.caller_id,
        receiver_id: session.receiver_id,
        call_type: session.call_type,
    };
    send_to_user(&state.registry, session.receiver_id, "call-started", &payload);
    send_to_user(&state.registry, session.caller_id, "receiver-accepted", &payload);
    Ok(())
}

/// The single terminal path for a tracked call. Quiet no-op when the call id
/// is unknown or already terminal, so duplicate end signals from both legs
/// are tolerated.
pub async fn end_call(state: &AppState, call_id: i64, status: CallStatus) -> Result<(), ApiError> {
    if !status.is_terminal() {
        return Err(ApiError::InvalidRequest("end-call requires a terminal status"));
    }

    let Some(session) = state.calls.take(call_id) else {
        tracing::debug!(call_id, "end-call for unknown or already ended call");
        return Ok(());
    };

    let duration_secs = (chrono::Utc::now() - session.started_at).num_seconds().max(0);
    let summary = summary_text(session.call_type, status, duration_secs);

    for (user_id, role) in [
        (session.caller_id, "caller"),
        (session.receiver_id, "receiver"),
    ] {
        send_to_user(
            &state.registry,
            user_id,
            "call-ended",
            &CallEnded {
                call_id,
                status,
                caller_id: session.caller_id,
                receiver_id: session.receiver_id,
                call_type: session.call_type,
                role,
                summary: summary.clone(),
            },
        );
    }

    // The live event already went out; persistence failures are retried in
    // the background instead of being surfaced mid-call.
    persist_terminal_async(state.clone(), call_id, status, summary);
    Ok(())
}

/// A user's last connection dropped: terminate every call they are part of.
/// Accepted calls end as `ended`, unanswered rings as `cancelled`.
pub async fn end_calls_for_disconnected_user(state: &AppState, user_id: i64) {
    for (call_id, accepted) in state.calls.calls_for_user(user_id) {
        let status = if accepted {
            CallStatus::Ended
        } else {
            CallStatus::Cancelled
        };
        if let Err(err) = end_call(state, call_id, status).await {
            tracing::warn!(call_id, user_id, error = %err, "implicit call termination failed");
        }
    }
}

/// Write a terminal status inline (used for calls that never rang: busy
/// receiver or offline receiver).
async fn finish_terminal(
    state: &AppState,
    call_id: i64,
    status: CallStatus,
    call_type: CallType,
    duration_secs: i64,
) -> Result<(), ApiError> {
    let summary = summary_text(call_type, status, duration_secs);
    run(&state.db, move |conn| {
        calls::finish_call(conn, call_id, status, &summary)?;
        Ok(())
    })
    .await
}

fn persist_terminal_async(state: AppState, call_id: i64, status: CallStatus, summary: String) {
    tokio::spawn(async move {
        for attempt in 1..=PERSIST_ATTEMPTS {
            let summary = summary.clone();
            let result = run(&state.db, move |conn| {
                Ok(calls::finish_call(conn, call_id, status, &summary)?)
            })
            .await;

            match result {
                Ok(Some(_)) => return,
                Ok(None) => {
                    // Another writer already landed the terminal transition
                    tracing::debug!(call_id, "terminal call write already applied");
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        call_id,
                        attempt,
                        error = %err,
                        "terminal call write failed"
                    );
                    tokio::time::sleep(PERSIST_BACKOFF).await;
                }
            }
        }
        tracing::error!(call_id, "giving up on terminal call write");
    });
}

// --- WebRTC negotiation relay ---
//
// Payloads are opaque; the server re-emits them to the target tagged with
// the sender's identity. An offline target means the event is dropped and
// logged — negotiation is time-sensitive, so nothing is queued or retried.

fn relay(state: &AppState, event: &str, target_user_id: i64, data: &serde_json::Value) {
    if !state.registry.is_online(target_user_id) {
        tracing::debug!(event, target_user_id, "dropping relay to offline user");
        return;
    }
    send_to_user(&state.registry, target_user_id, event, data);
}

pub fn relay_offer(
    state: &AppState,
    from_user_id: i64,
    target_user_id: i64,
    offer: serde_json::Value,
    call_id: Option<i64>,
) {
    let data = serde_json::json!({ "from": from_user_id, "offer": offer, "callId": call_id });
    relay(state, "offer", target_user_id, &data);
}

pub fn relay_answer(
    state: &AppState,
    from_user_id: i64,
    target_user_id: i64,
    answer: serde_json::Value,
) {
    let data = serde_json::json!({ "from": from_user_id, "answer": answer });
    relay(state, "answer", target_user_id, &data);
}

pub fn relay_ice_candidate(
    state: &AppState,
    from_user_id: i64,
    target_user_id: i64,
    candidate: serde_json::Value,
) {
    let data = serde_json::json!({ "from": from_user_id, "candidate": candidate });
    relay(state, "ice-candidate", target_user_id, &data);
}
