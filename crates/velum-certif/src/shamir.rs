//! Shamir recovery certificates.
//!
//! A user splits a recovery secret among recipients; the brief
//! certificate publishes the quorum threshold and the share counts,
//! the deletion certificate retires a previous setup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use velum_core::id::UserId;
use velum_core::time::Timestamp;

use crate::envelope::{impl_certificate, CertificateAuthor};

/// Publishes a shamir recovery setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShamirRecoveryBriefCertificate {
    /// A device of the user setting up recovery.
    pub author: CertificateAuthor,
    /// When the setup takes effect.
    pub timestamp: Timestamp,
    /// The protected user.
    pub user_id: UserId,
    /// Number of shares required to recover.
    pub threshold: u8,
    /// Share count handed to each recipient.
    pub per_recipient_shares: BTreeMap<UserId, u8>,
}
impl_certificate!(ShamirRecoveryBriefCertificate, "shamir_recovery_brief_certificate");

/// Retires a previous shamir recovery setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShamirRecoveryDeletionCertificate {
    /// A device of the protected user.
    pub author: CertificateAuthor,
    /// When the deletion takes effect.
    pub timestamp: Timestamp,
    /// User whose setup is deleted.
    pub setup_to_delete_user_id: UserId,
    /// Timestamp of the deleted setup, pinning exactly one.
    pub setup_to_delete_timestamp: Timestamp,
    /// Recipients of the deleted setup.
    pub share_recipients: Vec<UserId>,
}
impl_certificate!(ShamirRecoveryDeletionCertificate, "shamir_recovery_deletion_certificate");

#[cfg(test)]
mod tests {
    use velum_core::crypto::SigningKey;
    use velum_core::id::DeviceId;

    use crate::envelope::Certificate;

    use super::*;

    #[test]
    fn brief_round_trip() {
        let signkey = SigningKey::generate();
        let user_id = UserId::new();
        let cert = ShamirRecoveryBriefCertificate {
            author: CertificateAuthor::Device(DeviceId::new(user_id, "dev1".parse().unwrap())),
            timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            user_id,
            threshold: 2,
            per_recipient_shares: [(UserId::new(), 1), (UserId::new(), 2)].into(),
        };
        let raw = cert.dump_and_sign(&signkey);
        let loaded =
            ShamirRecoveryBriefCertificate::verify_and_load(&raw, &signkey.verify_key(), None)
                .unwrap();
        assert_eq!(loaded, cert);
    }
}
