pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
