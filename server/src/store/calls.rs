use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{CallRow, CallStatus, CallType, MessageRow, MessageType};
use crate::store::messages;

const CALL_COLUMNS: &str =
    "id, caller_id, receiver_id, call_type, status, started_at, ended_at, message_id";

fn row_to_call(row: &Row) -> rusqlite::Result<CallRow> {
    let type_str: String = row.get(3)?;
    let call_type = CallType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown call type: {type_str}").into(),
        )
    })?;
    let status_str: String = row.get(4)?;
    let status = CallStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown call status: {status_str}").into(),
        )
    })?;
    Ok(CallRow {
        id: row.get(0)?,
        caller_id: row.get(1)?,
        receiver_id: row.get(2)?,
        call_type,
        status,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        message_id: row.get(7)?,
    })
}

pub fn insert_call(
    conn: &Connection,
    caller_id: i64,
    receiver_id: i64,
    call_type: CallType,
) -> rusqlite::Result<CallRow> {
    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO calls (caller_id, receiver_id, call_type, status, started_at)
         VALUES (?1, ?2, ?3, 'ongoing', ?4)",
        params![caller_id, receiver_id, call_type.as_str(), started_at],
    )?;
    Ok(CallRow {
        id: conn.last_insert_rowid(),
        caller_id,
        receiver_id,
        call_type,
        status: CallStatus::Ongoing,
        started_at,
        ended_at: None,
        message_id: None,
    })
}

pub fn find_call(conn: &Connection, id: i64) -> rusqlite::Result<Option<CallRow>> {
    conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
        params![id],
        row_to_call,
    )
    .optional()
}

/// Terminal transition plus its linked summary message, in one transaction.
pub struct FinishedCall {
    pub call: CallRow,
    pub summary: MessageRow,
}

/// Apply the single durable terminal write for a call.
///
/// The update is guarded by `status = 'ongoing'`, so a second caller —
/// a racing end-call leg or a disconnect sweep — updates zero rows and gets
/// `Ok(None)` back. The summary message (type `call`, caller → receiver) is
/// written and linked in the same transaction as the status flip.
pub fn finish_call(
    conn: &mut Connection,
    call_id: i64,
    status: CallStatus,
    summary_content: &str,
) -> rusqlite::Result<Option<FinishedCall>> {
    let tx = conn.transaction()?;

    let existing = tx
        .query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
            params![call_id],
            row_to_call,
        )
        .optional()?;
    let call = match existing {
        Some(call) => call,
        None => return Ok(None),
    };

    let ended_at = Utc::now().to_rfc3339();
    let updated = tx.execute(
        "UPDATE calls SET status = ?2, ended_at = ?3 WHERE id = ?1 AND status = 'ongoing'",
        params![call_id, status.as_str(), ended_at],
    )?;
    if updated == 0 {
        return Ok(None);
    }

    let summary = messages::insert_message(
        &tx,
        call.caller_id,
        call.receiver_id,
        Some(summary_content),
        MessageType::Call,
    )?;
    tx.execute(
        "UPDATE calls SET message_id = ?2 WHERE id = ?1",
        params![call_id, summary.id],
    )?;

    tx.commit()?;

    Ok(Some(FinishedCall {
        call: CallRow {
            status,
            ended_at: Some(ended_at),
            message_id: Some(summary.id),
            ..call
        },
        summary,
    }))
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
    fn finish_call_writes_exactly_once() {
        let mut conn = test_conn();
        let a = users::create_user(&conn, "alice", None).unwrap().id;
        let b = users::create_user(&conn, "bob", None).unwrap().id;
        let call = insert_call(&conn, a, b, CallType::Video).unwrap();
        assert_eq!(call.status, CallStatus::Ongoing);

        let finished = finish_call(&mut conn, call.id, CallStatus::Ended, "Call ended (0:42)")
            .unwrap()
            .expect("first terminal write should land");
        assert_eq!(finished.call.status, CallStatus::Ended);
        assert_eq!(finished.summary.message_type, MessageType::Call);
        assert_eq!(finished.call.message_id, Some(finished.summary.id));

        // Racing second leg: no-op, no second summary message
        let again = finish_call(&mut conn, call.id, CallStatus::Rejected, "Call declined").unwrap();
        assert!(again.is_none());

        let stored = find_call(&conn, call.id).unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Ended);

        let summaries: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE message_type = 'call'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(summaries, 1);
    }

    #[test]
    fn finish_unknown_call_is_a_noop() {
        let mut conn = test_conn();
        assert!(finish_call(&mut conn, 999, CallStatus::Ended, "x")
            .unwrap()
            .is_none());
    }
}
