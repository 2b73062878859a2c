//! The shared 16-byte client credential.
//!
//! Configured once at startup from its canonical UUID text form and compared
//! against the bytes each client presents in its handshake.

use crate::error::{VlessError, VlessResult};
use uuid::{Uuid, Variant};

/// Length of the credential on the wire.
pub const CREDENTIAL_LEN: usize = 16;

/// Immutable client credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    bytes: [u8; CREDENTIAL_LEN],
    text: String,
}

impl Credential {
    /// Parse a credential from UUID text (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`).
    ///
    /// Fails only when the text cannot be read as 16 bytes. Use
    /// [`Credential::is_standard_uuid`] to detect values that parse but do
    /// not look like an RFC 4122 UUID.
    pub fn parse(text: &str) -> VlessResult<Self> {
        let uuid = Uuid::parse_str(text.trim())
            .map_err(|e| VlessError::Credential(format!("{text}: {e}")))?;
        Ok(Self {
            bytes: *uuid.as_bytes(),
            text: text.trim().to_string(),
        })
    }

    /// Build a credential directly from raw bytes.
    pub fn from_bytes(bytes: [u8; CREDENTIAL_LEN]) -> Self {
        Self {
            bytes,
            text: Uuid::from_bytes(bytes).hyphenated().to_string(),
        }
    }

    /// Raw credential bytes, as they appear in the handshake.
    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.bytes
    }

    /// The text form the credential was configured with.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the value has an RFC 4122 variant and a version in 1..=5.
    pub fn is_standard_uuid(&self) -> bool {
        let uuid = Uuid::from_bytes(self.bytes);
        uuid.get_variant() == Variant::RFC4122 && (1..=5).contains(&uuid.get_version_num())
    }

    /// Exact comparison of presented bytes. Anything other than exactly 16
    /// equal bytes is a mismatch.
    pub fn matches(&self, presented: &[u8]) -> bool {
        presented == self.bytes.as_slice()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(..)")
    }
}
