use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::models::NotificationRow;

fn row_to_notification(row: &Row) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        url: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Persist a notification. `user_id` None means a global notification.
pub fn insert_notification(
    conn: &Connection,
    user_id: Option<i64>,
    message: &str,
    url: Option<&str>,
) -> rusqlite::Result<NotificationRow> {
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications (user_id, message, url, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, message, url, created_at],
    )?;
    Ok(NotificationRow {
        id: conn.last_insert_rowid(),
        user_id,
        message: message.to_string(),
        url: url.map(str::to_string),
        is_read: false,
        created_at,
    })
}

/// A user's notifications, newest first.
pub fn list_for_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<NotificationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, message, url, is_read, created_at FROM notifications
         WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_notification)?;
    rows.collect()
}

pub fn mark_read(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(n > 0)
}

pub fn mark_all_read(conn: &Connection, user_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
    )
}

pub fn delete_notification(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let n = conn.execute("DELETE FROM notifications WHERE id = ?1", params![id])?;
    Ok(n > 0)
}
