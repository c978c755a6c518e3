//! In-memory call sessions and the busy set.
//!
//! A session exists from start-call until the terminal transition; removing
//! it is the single in-memory terminal step, so of two racing end-call legs
//! only one observes the session and becomes the notifier. The busy set maps
//! a user id to the accepted call they are in.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::db::models::CallType;

#[derive(Debug, Clone)]
pub struct CallSession {
    pub caller_id: i64,
    pub receiver_id: i64,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    /// Set when the receiver accepts; decides ended-vs-cancelled on an
    /// implicit termination.
    pub accepted: bool,
}

impl CallSession {
    pub fn involves(&self, user_id: i64) -> bool {
        self.caller_id == user_id || self.receiver_id == user_id
    }
}

#[derive(Clone, Default)]
pub struct CallSessions {
    /// call id → in-flight session
    sessions: Arc<DashMap<i64, CallSession>>,
    /// user id → call id of the accepted call they are in
    busy: Arc<DashMap<i64, i64>>,
}

impl CallSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly started call that is ringing the receiver.
    pub fn insert(&self, call_id: i64, caller_id: i64, receiver_id: i64, call_type: CallType) {
        self.sessions.insert(
            call_id,
            CallSession {
                caller_id,
                receiver_id,
                call_type,
                started_at: Utc::now(),
                accepted: false,
            },
        );
    }

    /// Mark the call accepted and put both participants into the busy set.
    /// Returns a snapshot of the session, or None for an unknown call id.
    pub fn mark_accepted(&self, call_id: i64) -> Option<CallSession> {
        let mut entry = self.sessions.get_mut(&call_id)?;
        entry.accepted = true;
        let snapshot = entry.clone();
        drop(entry);

        self.busy.insert(snapshot.caller_id, call_id);
        self.busy.insert(snapshot.receiver_id, call_id);
        Some(snapshot)
    }

    /// Remove the session and both busy entries. Exactly one caller gets
    /// Some for a given call id; everyone else sees a terminal no-op.
    pub fn take(&self, call_id: i64) -> Option<CallSession> {
        let (_, session) = self.sessions.remove(&call_id)?;
        self.busy.remove_if(&session.caller_id, |_, held| *held == call_id);
        self.busy.remove_if(&session.receiver_id, |_, held| *held == call_id);
        Some(session)
    }

    /// Whether the user is in an accepted, unterminated call.
    pub fn is_busy(&self, user_id: i64) -> bool {
        self.busy.contains_key(&user_id)
    }

    /// Every in-flight call the user participates in, ringing or accepted,
    /// as (call id, accepted). Used by the disconnect sweep.
    pub fn calls_for_user(&self, user_id: i64) -> Vec<(i64, bool)> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().involves(user_id))
            .map(|entry| (*entry.key(), entry.value().accepted))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_fills_busy_set_and_take_clears_it() {
        let sessions = CallSessions::new();
        sessions.insert(1, 10, 20, CallType::Audio);
        assert!(!sessions.is_busy(10));
        assert!(!sessions.is_busy(20));

        let snapshot = sessions.mark_accepted(1).expect("session exists");
        assert!(snapshot.accepted);
        assert!(sessions.is_busy(10));
        assert!(sessions.is_busy(20));

        let taken = sessions.take(1).expect("first take wins");
        assert_eq!(taken.caller_id, 10);
        assert!(!sessions.is_busy(10));
        assert!(!sessions.is_busy(20));

        // Racing second leg observes the terminal state
        assert!(sessions.take(1).is_none());
    }

    #[test]
    fn ringing_call_never_marks_anyone_busy() {
        let sessions = CallSessions::new();
        sessions.insert(7, 1, 2, CallType::Video);
        assert!(!sessions.is_busy(1));
        assert!(!sessions.is_busy(2));

        let taken = sessions.take(7).expect("session exists");
        assert!(!taken.accepted);
    }

    #[test]
    fn disconnect_sweep_sees_all_calls_for_a_user() {
        let sessions = CallSessions::new();
        sessions.insert(1, 10, 20, CallType::Audio);
        sessions.insert(2, 30, 10, CallType::Video);
        sessions.insert(3, 40, 50, CallType::Audio);

        sessions.mark_accepted(1);
        let mut calls = sessions.calls_for_user(10);
        calls.sort_unstable();
        assert_eq!(calls, vec![(1, true), (2, false)]);
    }

    #[test]
    fn busy_entry_survives_takes_of_other_calls() {
        let sessions = CallSessions::new();
        sessions.insert(1, 10, 20, CallType::Audio);
        sessions.mark_accepted(1);

        // The busy caller dials out; phone-line semantics allow it.
        sessions.insert(2, 10, 30, CallType::Audio);
        sessions.take(2);

        assert!(sessions.is_busy(10), "accepted call keeps the user busy");
    }
}
