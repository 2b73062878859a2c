//! Decoding of the first message of a relay session.
//!
//! Wire format (integers big-endian):
//!
//! ```text
//! +---------+------------+--------+---------+---------+------+------+---------+---------+
//! | version | credential | optlen | options | command | port | atyp | address | payload |
//! |    1    |     16     |   1    |    N    |    1    |  2   |  1   |   var   |   var   |
//! +---------+------------+--------+---------+---------+------+------+---------+---------+
//! ```
//!
//! Options are skipped without interpretation. The command byte is read but
//! every command is handled as "open outbound stream". Anything after the
//! address is payload destined for the outbound socket.

use crate::address::{read_host, AddressType};
use crate::credential::{Credential, CREDENTIAL_LEN};
use crate::cursor::ByteCursor;
use crate::error::HandshakeError;

/// The only protocol version accepted.
pub const PROTOCOL_VERSION: u8 = 0;

/// version + credential + option length + command.
pub const MIN_HANDSHAKE_LEN: usize = 1 + CREDENTIAL_LEN + 1 + 1;

/// Command value for "open outbound stream".
pub const CMD_CONNECT: u8 = 1;

/// A fully decoded connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol_version: u8,
    /// Command byte as sent by the client (not interpreted).
    pub command: u8,
    pub address_type: AddressType,
    pub host: String,
    pub port: u16,
    /// Offset of the first byte after the decoded header.
    pub header_length: usize,
}

impl ConnectRequest {
    /// `host:port`, bracketing IPv6 hosts.
    pub fn destination(&self) -> String {
        match self.address_type {
            AddressType::Ipv6 => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// The two-byte acknowledgment sent once the outbound stream is open.
    pub fn acknowledgment(&self) -> [u8; 2] {
        [self.protocol_version, 0]
    }
}

/// A decoded handshake borrowing its trailing payload from the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub request: ConnectRequest,
    /// Bytes after the header, forwarded to the destination first.
    pub payload: &'a [u8],
}

/// Decode a handshake message, checking it against `credential`.
///
/// Pure: identical input always yields an identical result.
pub fn parse_handshake<'a>(
    msg: &'a [u8],
    credential: &Credential,
) -> Result<Handshake<'a>, HandshakeError> {
    if msg.len() < MIN_HANDSHAKE_LEN {
        return Err(HandshakeError::TooShort {
            needed: MIN_HANDSHAKE_LEN,
            got: msg.len(),
        });
    }

    // Length was checked above, so the fixed-size prefix cannot fail.
    let mut cur = ByteCursor::new(msg);
    let version = cur.read_u8().map_err(too_short)?;
    if version != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    let presented = cur.read_bytes(CREDENTIAL_LEN).map_err(too_short)?;
    if !credential.matches(presented) {
        return Err(HandshakeError::CredentialMismatch);
    }

    let opt_len = cur.read_u8().map_err(too_short)? as usize;
    // options + command + port(2) + atyp(1)
    cur.require(opt_len + 1 + 3).map_err(too_short)?;
    cur.skip(opt_len).map_err(too_short)?;
    let command = cur.read_u8().map_err(too_short)?;

    let port = cur.read_u16().map_err(too_short)?;
    let tag = cur.read_u8().map_err(too_short)?;
    let address_type = AddressType::from_tag(tag)?;
    let host = read_host(&mut cur, address_type)?;

    Ok(Handshake {
        request: ConnectRequest {
            protocol_version: version,
            command,
            address_type,
            host,
            port,
            header_length: cur.position(),
        },
        payload: cur.rest(),
    })
}

fn too_short(e: crate::cursor::OutOfBounds) -> HandshakeError {
    HandshakeError::TooShort {
        needed: e.needed,
        got: e.got,
    }
}

/// Encode a handshake as a client would send it.
///
/// `host` is interpreted according to `address_type`; an unparseable IP
/// literal is an error.
pub fn encode_handshake(
    credential: &Credential,
    address_type: AddressType,
    host: &str,
    port: u16,
    payload: &[u8],
) -> Result<Vec<u8>, std::net::AddrParseError> {
    let mut out = Vec::with_capacity(MIN_HANDSHAKE_LEN + 3 + host.len() + 1 + payload.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(credential.as_bytes());
    out.push(0); // no options
    out.push(CMD_CONNECT);
    out.extend_from_slice(&port.to_be_bytes());
    out.push(address_type.tag());
    match address_type {
        AddressType::Ipv4 => {
            let ip: std::net::Ipv4Addr = host.parse()?;
            out.extend_from_slice(&ip.octets());
        }
        AddressType::DomainName => {
            let name = &host.as_bytes()[..host.len().min(u8::MAX as usize)];
            out.push(name.len() as u8);
            out.extend_from_slice(name);
        }
        AddressType::Ipv6 => {
            let ip: std::net::Ipv6Addr = host.parse()?;
            out.extend_from_slice(&ip.octets());
        }
    }
    out.extend_from_slice(payload);
    Ok(out)
}
