//! Session states and the reasons a session ends.

use vless_core::HandshakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Connecting,
    Relaying,
    Closed,
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// First message failed to decode. Nothing was written back.
    HandshakeMalformed(HandshakeError),
    /// Outbound socket could not be opened. Nothing was written back.
    OutboundConnectFailed(String),
    /// The acknowledgment could not be written.
    AckFailed(String),
    /// Inbound transport closed (close frame or EOF).
    InboundClosed,
    /// Destination closed its side.
    OutboundClosed,
    /// Read or write error on either side.
    RelayIoError(String),
    /// A full heartbeat interval passed without a pong.
    HeartbeatTimeout,
}

impl CloseReason {
    /// Coarse category for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CloseReason::HandshakeMalformed(_) => "handshake_malformed",
            CloseReason::OutboundConnectFailed(_) => "outbound_connect_failed",
            CloseReason::AckFailed(_) | CloseReason::RelayIoError(_) => "relay_io_error",
            CloseReason::InboundClosed | CloseReason::OutboundClosed => "peer_closed",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::HandshakeMalformed(e) => write!(f, "malformed handshake: {e}"),
            CloseReason::OutboundConnectFailed(e) => write!(f, "outbound connect failed: {e}"),
            CloseReason::AckFailed(e) => write!(f, "acknowledgment failed: {e}"),
            CloseReason::InboundClosed => f.write_str("inbound closed"),
            CloseReason::OutboundClosed => f.write_str("outbound closed"),
            CloseReason::RelayIoError(e) => write!(f, "relay io error: {e}"),
            CloseReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
        }
    }
}
