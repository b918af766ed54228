//! Certificate codecs.
//!
//! A certificate is a signed statement: a MessagePack payload (string
//! keys, explicit `type` tag) prefixed by the author's 64-byte
//! detached ed25519 signature. The byte form is canonical — signatures
//! depend on it — so loaded-but-unverified certificates keep the raw
//! payload around and re-dump it verbatim.
//!
//! Certificates that identify people exist in two parallel forms: the
//! full one, and a *redacted* one with identity fields stripped, served
//! to OUTSIDER users. [`RedactedCompare`] ties the two together.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod realm;
pub mod sequester;
pub mod shamir;
pub mod user;

pub use envelope::{Certificate, CertificateAuthor, CertifError, Unsecure};
pub use realm::{RealmKeyRotationCertificate, RealmNameCertificate, RealmRoleCertificate};
pub use sequester::{SequesterAuthorityCertificate, SequesterServiceCertificate};
pub use shamir::{ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate};
pub use user::{
    DeviceCertificate, RedactedCompare, RevokedUserCertificate, UserCertificate,
    UserUpdateCertificate,
};
