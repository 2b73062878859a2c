//! Destination address decoding.
//!
//! Wire encodings, selected by the preceding address-type tag:
//!
//! | Tag | Type       | Body                          |
//! |-----|------------|-------------------------------|
//! | 1   | IPv4       | 4 bytes                       |
//! | 2   | DomainName | 1-byte length `L`, `L` bytes  |
//! | 3   | IPv6       | 16 bytes (8 big-endian groups)|

use crate::cursor::{ByteCursor, OutOfBounds};
use crate::error::HandshakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Ipv4,
    DomainName,
    Ipv6,
}

impl AddressType {
    pub fn from_tag(tag: u8) -> Result<Self, HandshakeError> {
        match tag {
            1 => Ok(AddressType::Ipv4),
            2 => Ok(AddressType::DomainName),
            3 => Ok(AddressType::Ipv6),
            other => Err(HandshakeError::UnsupportedAddressType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            AddressType::Ipv4 => 1,
            AddressType::DomainName => 2,
            AddressType::Ipv6 => 3,
        }
    }
}

impl From<OutOfBounds> for HandshakeError {
    fn from(e: OutOfBounds) -> Self {
        HandshakeError::TruncatedAddress {
            needed: e.needed,
            got: e.got,
        }
    }
}

/// Decode the address body at `offset` for the given tag.
///
/// Returns the canonical host text and the number of bytes consumed.
pub fn decode_address(
    buf: &[u8],
    offset: usize,
    tag: u8,
) -> Result<(String, usize), HandshakeError> {
    let addr_type = AddressType::from_tag(tag)?;
    let mut cur = ByteCursor::new(buf);
    cur.skip(offset)?;
    let host = read_host(&mut cur, addr_type)?;
    Ok((host, cur.position() - offset))
}

/// Read an address body of `addr_type` from the cursor.
pub(crate) fn read_host(
    cur: &mut ByteCursor<'_>,
    addr_type: AddressType,
) -> Result<String, HandshakeError> {
    let host = match addr_type {
        AddressType::Ipv4 => {
            let o = cur.read_array::<4>()?;
            format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
        }
        AddressType::DomainName => {
            let len = cur.read_u8()? as usize;
            let name = cur.read_bytes(len)?;
            String::from_utf8_lossy(name).into_owned()
        }
        AddressType::Ipv6 => {
            let raw = cur.read_array::<16>()?;
            // No zero-compression: always eight groups.
            raw.chunks_exact(2)
                .map(|g| format!("{:x}", u16::from_be_bytes([g[0], g[1]])))
                .collect::<Vec<_>>()
                .join(":")
        }
    };
    Ok(host)
}
