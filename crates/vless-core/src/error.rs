use thiserror::Error;

/// Reasons a handshake message fails to decode.
///
/// Every variant converges on the same observable outcome (the inbound
/// transport is closed without a response); they stay distinct so callers
/// and tests can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("handshake too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("credential mismatch")]
    CredentialMismatch,

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("truncated address: need {needed} bytes, got {got}")]
    TruncatedAddress { needed: usize, got: usize },
}

/// Errors produced by the vless protocol layer.
#[derive(Debug, Error)]
pub enum VlessError {
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("invalid credential: {0}")]
    Credential(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type VlessResult<T> = Result<T, VlessError>;
