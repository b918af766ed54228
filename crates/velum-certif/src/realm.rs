//! Realm certificates: membership, name, key rotation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::id::{RealmId, UserId};
use velum_core::time::Timestamp;
use velum_core::types::RealmRole;

use crate::envelope::{impl_certificate, CertificateAuthor};

/// Grants, changes or removes a user's role on a realm.
///
/// `role = None` unshares. A realm's creation certificate is a role
/// certificate granting OWNER to its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmRoleCertificate {
    /// Signing device.
    pub author: CertificateAuthor,
    /// When the role change takes effect.
    pub timestamp: Timestamp,
    /// Target realm.
    pub realm_id: RealmId,
    /// Affected user.
    pub user_id: UserId,
    /// New effective role; `None` removes access.
    pub role: Option<RealmRole>,
}
impl_certificate!(RealmRoleCertificate, "realm_role_certificate");

/// Sets the (encrypted) display name of a realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmNameCertificate {
    /// Signing device (must be OWNER).
    pub author: CertificateAuthor,
    /// When the rename takes effect.
    pub timestamp: Timestamp,
    /// Target realm.
    pub realm_id: RealmId,
    /// Key index the name is encrypted under.
    pub key_index: u64,
    /// Name ciphertext, opaque to the server.
    pub encrypted_name: ByteBuf,
}
impl_certificate!(RealmNameCertificate, "realm_name_certificate");

/// Introduces key index `key_index` for a realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmKeyRotationCertificate {
    /// Signing device (must be OWNER).
    pub author: CertificateAuthor,
    /// When the rotation takes effect.
    pub timestamp: Timestamp,
    /// Target realm.
    pub realm_id: RealmId,
    /// The new key index; must be the realm's current index plus one.
    pub key_index: u64,
    /// AEAD algorithm of data written under this key.
    pub encryption_algorithm: String,
    /// Hash algorithm of the keys bundle integrity check.
    pub hash_algorithm: String,
    /// Canary ciphertext allowing members to sanity-check the key.
    pub key_canary: ByteBuf,
}
impl_certificate!(RealmKeyRotationCertificate, "realm_key_rotation_certificate");

/// Per-recipient encrypted access to a keys bundle, exchanged on
/// share and rotation. Not a certificate (nothing is signed); lives
/// here because it travels with the rotation certificate.
pub type PerParticipantKeysBundleAccess = BTreeMap<UserId, ByteBuf>;

#[cfg(test)]
mod tests {
    use velum_core::crypto::SigningKey;
    use velum_core::id::DeviceId;

    use crate::envelope::{Certificate, CertifError};

    use super::*;

    fn author() -> CertificateAuthor {
        CertificateAuthor::Device(DeviceId::new(UserId::new(), "dev1".parse().unwrap()))
    }

    #[test]
    fn role_certificate_round_trip_including_unshare() {
        let signkey = SigningKey::generate();
        for role in [
            Some(RealmRole::Owner),
            Some(RealmRole::Reader),
            None, // unshare
        ] {
            let cert = RealmRoleCertificate {
                author: author(),
                timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
                realm_id: RealmId::new(),
                user_id: UserId::new(),
                role,
            };
            let raw = cert.dump_and_sign(&signkey);
            let loaded =
                RealmRoleCertificate::verify_and_load(&raw, &signkey.verify_key(), None).unwrap();
            assert_eq!(loaded, cert);
        }
    }

    #[test]
    fn rotation_certificate_cannot_be_loaded_as_name_certificate() {
        let signkey = SigningKey::generate();
        let cert = RealmKeyRotationCertificate {
            author: author(),
            timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            realm_id: RealmId::new(),
            key_index: 1,
            encryption_algorithm: "XCHACHA20_POLY1305".into(),
            hash_algorithm: "BLAKE3".into(),
            key_canary: ByteBuf::from(vec![1, 2, 3]),
        };
        let raw = cert.dump_and_sign(&signkey);
        assert_eq!(
            RealmNameCertificate::verify_and_load(&raw, &signkey.verify_key(), None),
            Err(CertifError::Corrupted)
        );
    }
}
