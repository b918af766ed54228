//! Sequester certificates.
//!
//! A sequestered organization carries an *authority* key pair fixed at
//! bootstrap; the authority in turn certifies escrow *services* to
//! which every vlob write is additionally ciphertext-addressed.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::id::SequesterServiceId;
use velum_core::time::Timestamp;

use crate::envelope::{impl_certificate, CertificateAuthor};

/// Declares the sequester authority. Signed by the organization root
/// key during bootstrap; can never be added afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequesterAuthorityCertificate {
    /// Always the root key.
    pub author: CertificateAuthor,
    /// Bootstrap timestamp.
    pub timestamp: Timestamp,
    /// The authority's signature verification key.
    pub verify_key_der: ByteBuf,
}
impl_certificate!(SequesterAuthorityCertificate, "sequester_authority_certificate");

/// Declares an escrow service. Signed by the sequester authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequesterServiceCertificate {
    /// Always the root ("authority") side; kept for envelope symmetry.
    pub author: CertificateAuthor,
    /// When the service was certified.
    pub timestamp: Timestamp,
    /// The new service.
    pub service_id: SequesterServiceId,
    /// Human-readable label.
    pub service_label: String,
    /// Key vlob ciphertexts for this service are encrypted with.
    pub encryption_key_der: ByteBuf,
}
impl_certificate!(SequesterServiceCertificate, "sequester_service_certificate");
