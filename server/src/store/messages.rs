use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{MessageRow, MessageType, ReactionRow};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, message_type, sent_at, \
     is_read, is_revoked, is_deleted_for_sender, is_deleted_for_receiver";

fn row_to_message(row: &Row) -> rusqlite::Result<MessageRow> {
    let type_str: String = row.get(4)?;
    let message_type = MessageType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message type: {type_str}").into(),
        )
    })?;
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        message_type,
        sent_at: row.get(5)?,
        is_read: row.get(6)?,
        is_revoked: row.get(7)?,
        is_deleted_for_sender: row.get(8)?,
        is_deleted_for_receiver: row.get(9)?,
    })
}

pub fn insert_message(
    conn: &Connection,
    sender_id: i64,
    receiver_id: i64,
    content: Option<&str>,
    message_type: MessageType,
) -> rusqlite::Result<MessageRow> {
    let sent_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (sender_id, receiver_id, content, message_type, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![sender_id, receiver_id, content, message_type.as_str(), sent_at],
    )?;
    Ok(MessageRow {
        id: conn.last_insert_rowid(),
        sender_id,
        receiver_id,
        content: content.map(str::to_string),
        message_type,
        sent_at,
        is_read: false,
        is_revoked: false,
        is_deleted_for_sender: false,
        is_deleted_for_receiver: false,
    })
}

pub fn find_message(conn: &Connection, id: i64) -> rusqlite::Result<Option<MessageRow>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id],
        row_to_message,
    )
    .optional()
}

/// Mark every unread message from `from_user` to `to_user` as read.
/// Returns the number of rows updated.
pub fn mark_read_batch(conn: &Connection, from_user: i64, to_user: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        params![from_user, to_user],
    )
}

pub fn set_revoked(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
    conn.execute("UPDATE messages SET is_revoked = 1 WHERE id = ?1", params![id])
}

/// Tombstone a single message for one side. Idempotent.
pub fn tombstone_message(conn: &Connection, id: i64, for_sender: bool) -> rusqlite::Result<usize> {
    let sql = if for_sender {
        "UPDATE messages SET is_deleted_for_sender = 1 WHERE id = ?1"
    } else {
        "UPDATE messages SET is_deleted_for_receiver = 1 WHERE id = ?1"
    };
    conn.execute(sql, params![id])
}

/// Tombstone the whole conversation for `user_id`'s side only.
/// The counterpart's view is untouched.
pub fn tombstone_conversation(
    conn: &Connection,
    user_id: i64,
    other_id: i64,
) -> rusqlite::Result<usize> {
    let sent = conn.execute(
        "UPDATE messages SET is_deleted_for_sender = 1
         WHERE sender_id = ?1 AND receiver_id = ?2",
        params![user_id, other_id],
    )?;
    let received = conn.execute(
        "UPDATE messages SET is_deleted_for_receiver = 1
         WHERE sender_id = ?2 AND receiver_id = ?1",
        params![user_id, other_id],
    )?;
    Ok(sent + received)
}

/// Page of history between two users from `user_id`'s perspective, newest
/// first. Excludes only the requester's tombstones.
pub fn messages_between(
    conn: &Connection,
    user_id: i64,
    other_id: i64,
    limit: u32,
    offset: u32,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2 AND is_deleted_for_sender = 0)
            OR (sender_id = ?2 AND receiver_id = ?1 AND is_deleted_for_receiver = 0)
         ORDER BY sent_at DESC, id DESC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let rows = stmt.query_map(
        params![user_id, other_id, limit as i64, offset as i64],
        row_to_message,
    )?;
    rows.collect()
}

/// Total unread messages addressed to `user_id`, skipping the ones the
/// receiver has already tombstoned.
pub fn total_unread(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted_for_receiver = 0",
        params![user_id],
        |row| row.get(0),
    )
}

/// One reaction per (message, user): re-reacting replaces the emoji.
pub fn upsert_reaction(
    conn: &Connection,
    message_id: i64,
    user_id: i64,
    emoji: &str,
) -> rusqlite::Result<()> {
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (message_id, user_id)
         DO UPDATE SET emoji = excluded.emoji, created_at = excluded.created_at",
        params![message_id, user_id, emoji, created_at],
    )?;
    Ok(())
}

/// Returns true if a reaction row was removed.
pub fn delete_reaction(conn: &Connection, message_id: i64, user_id: i64) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
        params![message_id, user_id],
    )?;
    Ok(n > 0)
}

pub fn reactions_for_message(
    conn: &Connection,
    message_id: i64,
) -> rusqlite::Result<Vec<ReactionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, user_id, emoji, created_at FROM message_reactions
         WHERE message_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok(ReactionRow {
            id: row.get(0)?,
            message_id: row.get(1)?,
            user_id: row.get(2)?,
            emoji: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Row shape for conversation summaries: every non-tombstoned message the
/// user can see, newest first, joined with the counterpart's identity.
pub struct ConversationRow {
    pub message: MessageRow,
    pub friend_id: i64,
    pub friend_display_name: String,
    pub friend_avatar_url: Option<String>,
}

pub fn conversation_rows(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.message_type, m.sent_at,
                m.is_read, m.is_revoked, m.is_deleted_for_sender, m.is_deleted_for_receiver,
                u.id, u.display_name, u.avatar_url
         FROM messages m
         JOIN users u
           ON u.id = CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
         WHERE (m.sender_id = ?1 AND m.is_deleted_for_sender = 0)
            OR (m.receiver_id = ?1 AND m.is_deleted_for_receiver = 0)
         ORDER BY m.sent_at DESC, m.id DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(ConversationRow {
            message: row_to_message(row)?,
            friend_id: row.get(10)?,
            friend_display_name: row.get(11)?,
            friend_avatar_url: row.get(12)?,
        })
    })?;
    rows.collect()
}
