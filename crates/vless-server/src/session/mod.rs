//! Relay sessions: one per admitted WebSocket.

pub mod dial;
pub mod outcome;
pub mod relay;

pub use outcome::{CloseReason, SessionState};
pub use relay::RelaySession;
