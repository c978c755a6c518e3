use crate::call::sessions::CallSessions;
use crate::db::DbPool;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Everything here is cheap to clone: the DB pool is an Arc, and the
/// in-memory structures are Arcs over DashMaps.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Active WebSocket connections per user
    pub registry: ConnectionRegistry,
    /// Last-seen timestamps for users without a live connection
    pub presence: PresenceTracker,
    /// In-flight call sessions and the busy set
    pub calls: CallSessions,
}

impl AppState {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            registry: ConnectionRegistry::new(),
            presence: PresenceTracker::new(),
            calls: CallSessions::new(),
        }
    }
}
