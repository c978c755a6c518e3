//! Message delivery service.
//!
//! Validation and persistence run on the blocking pool via the storage
//! layer; fan-out to live connections happens afterwards and is always
//! best-effort. An offline participant is not an error — the stored row is
//! the durable record and history fetch covers catch-up.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

use crate::db::models::{MessageRow, MessageType, ReactionRow};
use crate::db::run;
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{blocks, messages, users};
use crate::ws::broadcast::send_to_user;

/// Wire shape of a message, shared by WS events and REST responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub sent_at: String,
    pub is_read: bool,
    pub is_revoked: bool,
    pub reactions: Vec<ReactionView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub user_id: i64,
    pub emoji: String,
    pub created_at: String,
}

impl MessageView {
    pub fn from_row(row: MessageRow, reactions: Vec<ReactionRow>) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            message_type: row.message_type,
            sent_at: row.sent_at,
            is_read: row.is_read,
            is_revoked: row.is_revoked,
            reactions: reactions
                .into_iter()
                .map(|r| ReactionView {
                    user_id: r.user_id,
                    emoji: r.emoji,
                    created_at: r.created_at,
                })
                .collect(),
        }
    }
}

fn require_user(conn: &Connection, id: i64, which: &'static str) -> Result<(), ApiError> {
    if users::user_exists(conn, id)? {
        Ok(())
    } else {
        Err(ApiError::NotFound(which))
    }
}

fn require_unblocked(conn: &Connection, a: i64, b: i64) -> Result<(), ApiError> {
    match blocks::find_blocker(conn, a, b)? {
        Some(_) => Err(ApiError::Blocked("messaging is blocked between these users")),
        None => Ok(()),
    }
}

fn load_view(conn: &Connection, message_id: i64) -> Result<MessageView, ApiError> {
    let row = messages::find_message(conn, message_id)?
        .ok_or(ApiError::NotFound("message not found"))?;
    let reactions = messages::reactions_for_message(conn, message_id)?;
    Ok(MessageView::from_row(row, reactions))
}

/// Push a message event to every live connection of both participants.
fn fan_out_to_parties(state: &AppState, event: &str, view: &MessageView) {
    send_to_user(&state.registry, view.receiver_id, event, view);
    if view.sender_id != view.receiver_id {
        send_to_user(&state.registry, view.sender_id, event, view);
    }
}

/// Persist and deliver a message. The receiver's connections get
/// `newMessage`; so do the sender's, keeping their other sessions in sync.
/// The `messageSent` ack to the invoking connection is the caller's job.
pub async fn send(
    state: &AppState,
    sender_id: i64,
    receiver_id: i64,
    content: String,
) -> Result<MessageView, ApiError> {
    let row = run(&state.db, move |conn| {
        require_user(conn, sender_id, "sender not found")?;
        require_user(conn, receiver_id, "receiver not found")?;
        require_unblocked(conn, sender_id, receiver_id)?;
        Ok(messages::insert_message(
            conn,
            sender_id,
            receiver_id,
            Some(&content),
            MessageType::Text,
        )?)
    })
    .await?;

    let view = MessageView::from_row(row, Vec::new());
    fan_out_to_parties(state, "newMessage", &view);
    Ok(view)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesRead {
    from_user_id: i64,
    to_user_id: i64,
}

/// Mark every unread message from `from_user` to `to_user` as read, then
/// send a read receipt to the original sender's connections only.
pub async fn mark_as_read(
    state: &AppState,
    from_user: i64,
    to_user: i64,
) -> Result<usize, ApiError> {
    let updated = run(&state.db, move |conn| {
        Ok(messages::mark_read_batch(conn, from_user, to_user)?)
    })
    .await?;

    if updated > 0 {
        send_to_user(
            &state.registry,
            from_user,
            "messagesRead",
            &MessagesRead {
                from_user_id: from_user,
                to_user_id: to_user,
            },
        );
    }
    Ok(updated)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageRevoked {
    message_id: i64,
}

/// Revoke a message. Only the original sender may do this; the row stays in
/// storage and clients hide the content on the `messageRevoked` event.
pub async fn revoke(state: &AppState, message_id: i64, requester: i64) -> Result<(), ApiError> {
    let (sender_id, receiver_id) = run(&state.db, move |conn| {
        let row = messages::find_message(conn, message_id)?
            .ok_or(ApiError::NotFound("message not found"))?;
        if row.sender_id != requester {
            return Err(ApiError::Unauthorized("only the sender can revoke a message"));
        }
        messages::set_revoked(conn, message_id)?;
        Ok((row.sender_id, row.receiver_id))
    })
    .await?;

    let payload = MessageRevoked { message_id };
    send_to_user(&state.registry, sender_id, "messageRevoked", &payload);
    if sender_id != receiver_id {
        send_to_user(&state.registry, receiver_id, "messageRevoked", &payload);
    }
    Ok(())
}

/// Upsert the (message, user) reaction — last writer wins — and rebroadcast
/// the updated message to both parties.
pub async fn react(
    state: &AppState,
    message_id: i64,
    user_id: i64,
    emoji: String,
) -> Result<MessageView, ApiError> {
    let view = run(&state.db, move |conn| {
        let row = messages::find_message(conn, message_id)?
            .ok_or(ApiError::NotFound("message not found"))?;
        if user_id != row.sender_id && user_id != row.receiver_id {
            return Err(ApiError::Unauthorized("not a participant in this conversation"));
        }
        messages::upsert_reaction(conn, message_id, user_id, &emoji)?;
        load_view(conn, message_id)
    })
    .await?;

    fan_out_to_parties(state, "reactionUpdated", &view);
    Ok(view)
}

/// Delete the (message, user) reaction, if any, and rebroadcast.
pub async fn remove_reaction(
    state: &AppState,
    message_id: i64,
    user_id: i64,
) -> Result<MessageView, ApiError> {
    let view = run(&state.db, move |conn| {
        if messages::find_message(conn, message_id)?.is_none() {
            return Err(ApiError::NotFound("message not found"));
        }
        messages::delete_reaction(conn, message_id, user_id)?;
        load_view(conn, message_id)
    })
    .await?;

    fan_out_to_parties(state, "reactionUpdated", &view);
    Ok(view)
}

/// Set the requester-side tombstone. Idempotent; the other side's view is
/// never affected.
pub async fn delete_for_me(
    state: &AppState,
    message_id: i64,
    requester: i64,
) -> Result<(), ApiError> {
    run(&state.db, move |conn| {
        let row = messages::find_message(conn, message_id)?
            .ok_or(ApiError::NotFound("message not found"))?;
        let for_sender = if requester == row.sender_id {
            true
        } else if requester == row.receiver_id {
            false
        } else {
            return Err(ApiError::Unauthorized("not a participant in this conversation"));
        };
        messages::tombstone_message(conn, message_id, for_sender)?;
        Ok(())
    })
    .await
}

/// Tombstone the whole conversation for `user_id`'s side only.
pub async fn delete_conversation(
    state: &AppState,
    user_id: i64,
    other_id: i64,
) -> Result<usize, ApiError> {
    run(&state.db, move |conn| {
        require_user(conn, other_id, "user not found")?;
        Ok(messages::tombstone_conversation(conn, user_id, other_id)?)
    })
    .await
}

/// Paginated history between two users from `user_id`'s perspective,
/// newest first, excluding only the requester's tombstones.
pub async fn messages_between(
    state: &AppState,
    user_id: i64,
    other_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageView>, ApiError> {
    run(&state.db, move |conn| {
        let rows = messages::messages_between(conn, user_id, other_id, limit, offset)?;
        rows.into_iter()
            .map(|row| {
                let reactions = messages::reactions_for_message(conn, row.id)?;
                Ok(MessageView::from_row(row, reactions))
            })
            .collect()
    })
    .await
}

pub async fn total_unread(state: &AppState, user_id: i64) -> Result<i64, ApiError> {
    run(&state.db, move |conn| Ok(messages::total_unread(conn, user_id)?)).await
}

/// Forward an existing message's content to another user as a fresh send.
/// Block checks and fan-out behave exactly like a normal send.
pub async fn forward(
    state: &AppState,
    message_id: i64,
    sender_id: i64,
    receiver_id: i64,
) -> Result<MessageView, ApiError> {
    if sender_id == receiver_id {
        return Err(ApiError::InvalidRequest("cannot forward a message to yourself"));
    }

    let row = run(&state.db, move |conn| {
        let original = messages::find_message(conn, message_id)?
            .ok_or(ApiError::NotFound("message not found"))?;
        require_user(conn, sender_id, "sender not found")?;
        require_user(conn, receiver_id, "receiver not found")?;
        require_unblocked(conn, sender_id, receiver_id)?;
        Ok(messages::insert_message(
            conn,
            sender_id,
            receiver_id,
            original.content.as_deref(),
            MessageType::Text,
        )?)
    })
    .await?;

    let view = MessageView::from_row(row, Vec::new());
    fan_out_to_parties(state, "newMessage", &view);
    Ok(view)
}

/// Idempotent block creation. Returns true when a new block was written.
pub async fn block(state: &AppState, blocker_id: i64, blocked_id: i64) -> Result<bool, ApiError> {
    if blocker_id == blocked_id {
        return Err(ApiError::InvalidRequest("cannot block yourself"));
    }
    run(&state.db, move |conn| {
        require_user(conn, blocker_id, "blocker not found")?;
        require_user(conn, blocked_id, "blocked user not found")?;
        Ok(blocks::insert_block(conn, blocker_id, blocked_id)?)
    })
    .await
}

/// Idempotent block removal. Returns true when a block was deleted.
pub async fn unblock(state: &AppState, blocker_id: i64, blocked_id: i64) -> Result<bool, ApiError> {
    run(&state.db, move |conn| {
        Ok(blocks::delete_block(conn, blocker_id, blocked_id)?)
    })
    .await
}

/// Who, if anyone, created a block between the pair (either direction).
pub async fn block_status(state: &AppState, a: i64, b: i64) -> Result<Option<i64>, ApiError> {
    run(&state.db, move |conn| Ok(blocks::find_blocker(conn, a, b)?)).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub friend_id: i64,
    pub friend_name: String,
    pub friend_avatar_url: Option<String>,
    pub last_message: MessageView,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
    pub total_unread_count: i64,
}

///// One entry per counterpart the user has visible history with: the latest
/// visible message plus per-conversation and total unread counts.
pub async fn conversations(state: &AppState, user_id: i64) -> Result<ConversationsResponse, ApiError> {
    run(&state.db, move |conn| {
        let rows = messages::conversation_rows(conn, user_id)?;

        // Rows come newest-first, so the first row per friend is that
        // conversation's latest visible message.
        let mut order: Vec<i64> = Vec::new();
        let mut latest: HashMap<i64, ConversationSummary> = HashMap::new();
        let mut total_unread_count = 0;

        for row in rows {
            let unread = row.message.receiver_id == user_id && !row.message.is_read;
            if unread {
                total_unread_count += 1;
            }

            match latest.get_mut(&row.friend_id) {
                Some(summary) => {
                    if unread {
                        summary.unread_count += 1;
                    }
                }
                None => {
                    order.push(row.friend_id);
                    let reactions = messages::reactions_for_message(conn, row.message.id)?;
                    latest.insert(
                        row.friend_id,
                        ConversationSummary {
                            friend_id: row.friend_id,
                            friend_name: row.friend_display_name,
                            friend_avatar_url: row.friend_avatar_url,
                            last_message: MessageView::from_row(row.message, reactions),
                            unread_count: if unread { 1 } else { 0 },
                        },
                    );
                }
            }
        }

        let conversations = order
            .into_iter()
            .filter_map(|friend_id| latest.remove(&friend_id))
            .collect();
        Ok(ConversationsResponse {
            conversations,
            total_unread_count,
        })
    })
    .await
}
