//! One-shot credentials.
//!
//! Tokens are 128-bit random values exchanged as 32-character hex
//! strings. They carry no structure: possession is the credential.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parse failure for a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid token")]
pub struct InvalidToken;

macro_rules! token {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde(with = "serde_bytes_16")] [u8; 16]);

        impl $name {
            /// Draw a fresh random token.
            pub fn new() -> Self {
                let mut bytes = [0u8; 16];
                rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
                Self(bytes)
            }

            /// Rebuild from raw bytes.
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Parse the 32-character hex form.
            pub fn from_hex(s: &str) -> Result<Self, InvalidToken> {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidToken)?;
                Ok(Self(bytes))
            }

            /// Lowercase hex form.
            pub fn hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.hex())
            }
        }

        impl FromStr for $name {
            type Err = InvalidToken;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

token!(
    /// Unlocks the first certificate issuance of an organization.
    BootstrapToken
);
token!(
    /// Credential of an invited (not yet enrolled) client.
    InvitationToken
);

mod serde_bytes_16 {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(&bytes[..], serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 16], D::Error> {
        let buf: serde_bytes::ByteBuf = serde_bytes::deserialize(deserializer)?;
        buf.as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let token = InvitationToken::new();
        assert_eq!(InvitationToken::from_hex(&token.hex()).unwrap(), token);
        assert!(InvitationToken::from_hex("nope").is_err());
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(BootstrapToken::new(), BootstrapToken::new());
    }
}
