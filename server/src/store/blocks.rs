use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Create a messaging block. Idempotent: returns true only when a new row
/// was written.
pub fn insert_block(conn: &Connection, blocker_id: i64, blocked_id: i64) -> rusqlite::Result<bool> {
    let created_at = Utc::now().to_rfc3339();
    let n = conn.execute(
        "INSERT OR IGNORE INTO message_blocks (blocker_id, blocked_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![blocker_id, blocked_id, created_at],
    )?;
    Ok(n > 0)
}

/// Remove a block. Idempotent: returns true only when a row was deleted.
pub fn delete_block(conn: &Connection, blocker_id: i64, blocked_id: i64) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM message_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
        params![blocker_id, blocked_id],
    )?;
    Ok(n > 0)
}

/// A block between the pair in either direction. Returns who created it.
pub fn find_blocker(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT blocker_id FROM message_blocks
         WHERE (blocker_id = ?1 AND blocked_id = ?2)
            OR (blocker_id = ?2 AND blocked_id = ?1)
         LIMIT 1",
        params![a, b],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::migrations;
    use crate::store::users;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrations().to_latest(&mut conn).unwrap();
        conn
    }

    #[test]
    fn block_is_idempotent_and_visible_both_directions() {
        let conn = test_conn();
        let a = users::create_user(&conn, "alice", None).unwrap().id;
        let b = users::create_user(&conn, "bob", None).unwrap().id;

        assert!(insert_block(&conn, a, b).unwrap());
        assert!(!insert_block(&conn, a, b).unwrap());

        assert_eq!(find_blocker(&conn, a, b).unwrap(), Some(a));
        assert_eq!(find_blocker(&conn, b, a).unwrap(), Some(a));

        assert!(delete_block(&conn, a, b).unwrap());
        assert!(!delete_block(&conn, a, b).unwrap());
        assert_eq!(find_blocker(&conn, a, b).unwrap(), None);
    }
}
