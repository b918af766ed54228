//! User and device certificates, full and redacted.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::crypto::VerifyKey;
use velum_core::id::{DeviceLabel, DeviceName, HumanHandle, UserId};
use velum_core::time::Timestamp;
use velum_core::types::UserProfile;

use crate::envelope::{impl_certificate, CertificateAuthor};

/// Introduces a user into the organization.
///
/// `human_handle` is `None` in the redacted variant served to
/// OUTSIDER users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCertificate {
    /// Signing device, or root at bootstrap.
    pub author: CertificateAuthor,
    /// When the user was certified.
    pub timestamp: Timestamp,
    /// The new user.
    pub user_id: UserId,
    /// Identity; stripped in the redacted variant.
    pub human_handle: Option<HumanHandle>,
    /// The user's public encryption key (opaque to the server).
    pub public_key: ByteBuf,
    /// Initial profile.
    pub profile: UserProfile,
}
impl_certificate!(UserCertificate, "user_certificate");

impl UserCertificate {
    /// The redacted twin of this certificate.
    pub fn redacted(&self) -> Self {
        Self {
            human_handle: None,
            ..self.clone()
        }
    }

    /// Whether identity fields have been stripped.
    pub fn is_redacted(&self) -> bool {
        self.human_handle.is_none()
    }
}

/// Introduces a device of an existing user.
///
/// `device_label` is `None` in the redacted variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCertificate {
    /// Signing device, or root at bootstrap.
    pub author: CertificateAuthor,
    /// When the device was certified.
    pub timestamp: Timestamp,
    /// Owning user.
    pub user_id: UserId,
    /// Name unique among the user's devices.
    pub device_name: DeviceName,
    /// Human-readable label; stripped in the redacted variant.
    pub device_label: Option<DeviceLabel>,
    /// The device's signature verification key.
    pub verify_key: VerifyKey,
}
impl_certificate!(DeviceCertificate, "device_certificate");

impl DeviceCertificate {
    /// The redacted twin of this certificate.
    pub fn redacted(&self) -> Self {
        Self {
            device_label: None,
            ..self.clone()
        }
    }

    /// Whether identity fields have been stripped.
    pub fn is_redacted(&self) -> bool {
        self.device_label.is_none()
    }
}

/// Irreversibly revokes a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokedUserCertificate {
    /// Signing device (must belong to an ADMIN).
    pub author: CertificateAuthor,
    /// When the revocation takes effect.
    pub timestamp: Timestamp,
    /// The revoked user.
    pub user_id: UserId,
}
impl_certificate!(RevokedUserCertificate, "revoked_user_certificate");

/// Changes a user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpdateCertificate {
    /// Signing device (must belong to an ADMIN).
    pub author: CertificateAuthor,
    /// When the update takes effect.
    pub timestamp: Timestamp,
    /// The updated user.
    pub user_id: UserId,
    /// The profile from this point on.
    pub new_profile: UserProfile,
}
impl_certificate!(UserUpdateCertificate, "user_update_certificate");

/// Equivalence between a full certificate and its redacted twin.
///
/// Tight enough that the redacted copy leaks nothing it should not,
/// lax enough that both copies prove the same action.
pub trait RedactedCompare {
    /// `redacted` must equal `self` with identity fields stripped.
    fn redacted_compare(&self, redacted: &Self) -> bool;
}

impl RedactedCompare for UserCertificate {
    fn redacted_compare(&self, redacted: &Self) -> bool {
        redacted.is_redacted() && self.redacted() == *redacted
    }
}

impl RedactedCompare for DeviceCertificate {
    fn redacted_compare(&self, redacted: &Self) -> bool {
        redacted.is_redacted() && self.redacted() == *redacted
    }
}

#[cfg(test)]
mod tests {
    use velum_core::crypto::SigningKey;
    use velum_core::id::DeviceId;

    use crate::envelope::Certificate;

    use super::*;

    fn full_user_certificate() -> UserCertificate {
        UserCertificate {
            author: CertificateAuthor::Root,
            timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            user_id: UserId::new(),
            human_handle: Some(HumanHandle::new("alice@example.com", "Alice").unwrap()),
            public_key: ByteBuf::from(vec![0u8; 32]),
            profile: UserProfile::Admin,
        }
    }

    #[test]
    fn redacted_user_strips_only_the_handle() {
        let full = full_user_certificate();
        let redacted = full.redacted();
        assert!(redacted.is_redacted());
        assert!(full.redacted_compare(&redacted));
        assert_eq!(redacted.user_id, full.user_id);
        assert_eq!(redacted.profile, full.profile);
    }

    #[test]
    fn redacted_compare_rejects_mismatch() {
        let full = full_user_certificate();
        let mut other = full.redacted();
        other.user_id = UserId::new();
        assert!(!full.redacted_compare(&other));
        // a full certificate is not a redaction of itself
        assert!(!full.redacted_compare(&full));
    }

    #[test]
    fn device_certificate_round_trip() {
        let signkey = SigningKey::generate();
        let author = DeviceId::new(UserId::new(), "dev1".parse().unwrap());
        let cert = DeviceCertificate {
            author: CertificateAuthor::Device(author.clone()),
            timestamp: Timestamp::from_rfc3339("2024-01-02T00:00:00Z").unwrap(),
            user_id: author.user_id,
            device_name: "dev2".parse().unwrap(),
            device_label: Some(DeviceLabel::new("Alice's phone")),
            verify_key: SigningKey::generate().verify_key(),
        };
        let raw = cert.dump_and_sign(&signkey);
        let loaded = DeviceCertificate::verify_and_load(
            &raw,
            &signkey.verify_key(),
            Some(&CertificateAuthor::Device(author)),
        )
        .unwrap();
        assert_eq!(loaded, cert);
        assert!(cert.redacted_compare(&cert.redacted()));
    }
}
