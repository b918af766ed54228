//! Opaque identifiers.
//!
//! Every entity id is a random 128-bit value. Identifiers never encode
//! ordering or tenancy; the organization id is the only human-chosen
//! one and is restricted to a conservative alphabet so it can appear
//! in URLs verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Maximum byte length of an organization identifier.
pub const ORGANIZATION_ID_MAX_LEN: usize = 32;

/// Maximum UTF-8 byte length of a human handle label.
pub const HUMAN_HANDLE_LABEL_MAX_LEN: usize = 254;

/// Maximum UTF-8 byte length of an email address.
pub const EMAIL_MAX_LEN: usize = 254;

/// Maximum byte length of a device name or device label.
pub const DEVICE_NAME_MAX_LEN: usize = 32;

/// Error returned when parsing any identifier from user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}")]
pub struct InvalidId {
    /// Which identifier kind failed to parse.
    pub kind: &'static str,
}

impl InvalidId {
    fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Draw a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Rebuild an identifier from its 16 raw bytes.
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// The 16 raw bytes of the identifier.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Parse from the 32-character lowercase hex form.
            pub fn from_hex(s: &str) -> Result<Self, InvalidId> {
                Uuid::try_parse(s)
                    .map(Self)
                    .map_err(|_| InvalidId::new($kind))
            }

            /// Lowercase hex form without dashes.
            pub fn hex(&self) -> String {
                self.0.simple().to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

uuid_id!(
    /// A user inside an organization.
    UserId,
    "user id"
);
uuid_id!(
    /// A shared workspace.
    RealmId,
    "realm id"
);
uuid_id!(
    /// A versioned opaque blob.
    VlobId,
    "vlob id"
);
uuid_id!(
    /// A payload in the external blockstore.
    BlockId,
    "block id"
);
uuid_id!(
    /// A sequester escrow service.
    SequesterServiceId,
    "sequester service id"
);
uuid_id!(
    /// An async-enrollment submission.
    EnrollmentId,
    "enrollment id"
);
uuid_id!(
    /// One greeter/claimer exchange within an invitation.
    GreetingAttemptId,
    "greeting attempt id"
);
uuid_id!(
    /// A vault inside an account.
    AccountVaultId,
    "account vault id"
);

/// Tenant identifier, chosen at organization creation.
///
/// Restricted to `[a-zA-Z0-9_-]{1,32}` so it can be embedded in the
/// RPC URL path without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

impl OrganizationId {
    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrganizationId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty()
            || value.len() > ORGANIZATION_ID_MAX_LEN
            || !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InvalidId::new("organization id"));
        }
        Ok(Self(value))
    }
}

impl From<OrganizationId> for String {
    fn from(value: OrganizationId) -> Self {
        value.0
    }
}

impl FromStr for OrganizationId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a device, unique among the devices of one user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

impl DeviceName {
    /// The raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceName {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty()
            || value.len() > DEVICE_NAME_MAX_LEN
            || !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InvalidId::new("device name"));
        }
        Ok(Self(value))
    }
}

impl From<DeviceName> for String {
    fn from(value: DeviceName) -> Self {
        value.0
    }
}

impl FromStr for DeviceName {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable label attached to a device certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceLabel(String);

impl DeviceLabel {
    /// Build a label, trimming to the allowed length.
    pub fn new(label: impl Into<String>) -> Self {
        let mut label = label.into();
        if label.len() > HUMAN_HANDLE_LABEL_MAX_LEN {
            // Cut on a char boundary, never mid-codepoint
            let mut cut = HUMAN_HANDLE_LABEL_MAX_LEN;
            while !label.is_char_boundary(cut) {
                cut -= 1;
            }
            label.truncate(cut);
        }
        Self(label)
    }

    /// The raw label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified device identifier: `(user_id, device_name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Owning user.
    pub user_id: UserId,
    /// Name unique among this user's devices.
    pub device_name: DeviceName,
}

impl DeviceId {
    /// Build a device identifier.
    pub fn new(user_id: UserId, device_name: DeviceName) -> Self {
        Self {
            user_id,
            device_name,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.device_name)
    }
}

impl FromStr for DeviceId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, name) = s.split_once('@').ok_or(InvalidId::new("device id"))?;
        Ok(Self {
            user_id: user.parse().map_err(|_| InvalidId::new("device id"))?,
            device_name: name.parse().map_err(|_| InvalidId::new("device id"))?,
        })
    }
}

/// NFC-normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized: String = value.trim().nfc().collect();
        let (local, domain) = normalized
            .split_once('@')
            .ok_or(InvalidId::new("email address"))?;
        if local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || normalized.len() > EMAIL_MAX_LEN
            || normalized.chars().any(char::is_whitespace)
        {
            return Err(InvalidId::new("email address"));
        }
        Ok(Self(normalized))
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl FromStr for EmailAddress {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email plus display label identifying a human.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanHandle {
    /// Contact address, unique among non-revoked users of an organization.
    pub email: EmailAddress,
    /// Display name, at most 254 UTF-8 bytes.
    pub label: String,
}

impl HumanHandle {
    /// Build a handle; fails on an invalid email or oversized label.
    pub fn new(email: &str, label: &str) -> Result<Self, InvalidId> {
        if label.is_empty() || label.len() > HUMAN_HANDLE_LABEL_MAX_LEN {
            return Err(InvalidId::new("human handle label"));
        }
        Ok(Self {
            email: email.parse()?,
            label: label.to_owned(),
        })
    }
}

impl fmt::Display for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.label, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_id_alphabet() {
        assert!("Org-42_x".parse::<OrganizationId>().is_ok());
        assert!("".parse::<OrganizationId>().is_err());
        assert!("bad org".parse::<OrganizationId>().is_err());
        assert!("a".repeat(33).parse::<OrganizationId>().is_err());
    }

    #[test]
    fn device_id_round_trip() {
        let device_id = DeviceId::new(UserId::new(), "laptop".parse().unwrap());
        let parsed: DeviceId = device_id.to_string().parse().unwrap();
        assert_eq!(parsed, device_id);
    }

    #[test]
    fn email_is_nfc_normalized() {
        // U+0065 U+0301 (e + combining acute) normalizes to U+00E9
        let decomposed = "re\u{0301}my@example.com";
        let composed = "r\u{e9}my@example.com";
        let a: EmailAddress = decomposed.parse().unwrap();
        let b: EmailAddress = composed.parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn email_rejects_garbage() {
        assert!("not-an-email".parse::<EmailAddress>().is_err());
        assert!("a b@example.com".parse::<EmailAddress>().is_err());
        assert!("@example.com".parse::<EmailAddress>().is_err());
    }

    #[test]
    fn device_label_trims_on_char_boundary() {
        // 253 ascii bytes then a 2-byte char straddling the 254 limit
        let raw = format!("{}\u{e9}tail", "x".repeat(253));
        let label = DeviceLabel::new(raw);
        assert_eq!(label.as_str().len(), 253);
        assert_eq!(label.as_str(), "x".repeat(253));

        let ascii = "y".repeat(300);
        assert_eq!(DeviceLabel::new(ascii).as_str().len(), 254);
    }

    #[test]
    fn human_handle_label_bounds() {
        assert!(HumanHandle::new("alice@example.com", "Alice").is_ok());
        assert!(HumanHandle::new("alice@example.com", "").is_err());
        assert!(HumanHandle::new("alice@example.com", &"x".repeat(255)).is_err());
    }
}
