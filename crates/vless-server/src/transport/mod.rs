//! Inbound transport plumbing: head replay and the WebSocket side.

pub mod rewind;
pub mod websocket;

pub use rewind::Rewind;
