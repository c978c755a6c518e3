pub mod sessions;
pub mod signaling;
