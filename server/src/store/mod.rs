//! SQL storage operations.
//!
//! Every statement the server runs lives here, one function per operation
//! over a borrowed connection. Callers hold the DbPool mutex inside
//! tokio::task::spawn_blocking — nothing in this module is async.

pub mod blocks;
pub mod calls;
pub mod messages;
pub mod notifications;
pub mod users;
