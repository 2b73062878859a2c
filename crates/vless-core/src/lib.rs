//! vless-core: protocol library for the vless relay.
//!
//! Provides the client credential, a bounds-checked byte cursor, destination
//! address decoding, handshake parsing, and subscription link rendering.
//! Nothing in this crate performs I/O.

pub mod address;
pub mod credential;
pub mod cursor;
pub mod error;
pub mod handshake;
pub mod link;

// Re-export commonly used items at crate root.
pub use address::{decode_address, AddressType};
pub use credential::{Credential, CREDENTIAL_LEN};
pub use cursor::ByteCursor;
pub use error::{HandshakeError, VlessError, VlessResult};
pub use handshake::{
    encode_handshake, parse_handshake, ConnectRequest, Handshake, PROTOCOL_VERSION,
};
pub use link::{build_links, encode_subscription, parse_host_header, LinkParams, SubMode};
