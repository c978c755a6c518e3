use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::UserRow;

/// Provision a user id. This is the seam for the external identity system;
/// no profile fields beyond a display name and optional avatar exist here.
pub fn create_user(
    conn: &Connection,
    display_name: &str,
    avatar_url: Option<&str>,
) -> rusqlite::Result<UserRow> {
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (display_name, avatar_url, created_at) VALUES (?1, ?2, ?3)",
        params![display_name, avatar_url, created_at],
    )?;
    Ok(UserRow {
        id: conn.last_insert_rowid(),
        display_name: display_name.to_string(),
        avatar_url: avatar_url.map(str::to_string),
        created_at,
    })
}

pub fn find_user(conn: &Connection, id: i64) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, display_name, avatar_url, created_at FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                avatar_url: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn user_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}
