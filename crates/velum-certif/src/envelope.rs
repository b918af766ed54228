//! Signed envelope shared by every certificate kind.
//!
//! Wire form: `signature (64 bytes) || payload (MessagePack map)`.
//! The payload map carries a `type` entry for domain separation, so a
//! signature over one certificate kind can never be replayed as
//! another.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use velum_core::crypto::{SigningKey, VerifyKey, SIGNATURE_LEN};
use velum_core::id::DeviceId;
use velum_core::time::Timestamp;

/// Validation failures, preserved through the call chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertifError {
    /// Payload is not a well-formed certificate of the expected kind.
    #[error("corrupted certificate payload")]
    Corrupted,
    /// Signature does not verify against the provided key.
    #[error("invalid certificate signature")]
    Signature,
    /// The payload names a different author than expected.
    #[error("unexpected certificate author")]
    UnexpectedAuthor,
}

/// Who signed a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CertificateAuthor {
    /// A device of the organization.
    Device(DeviceId),
    /// The organization root key (bootstrap-time certificates only).
    Root,
}

impl CertificateAuthor {
    /// The device author, if any.
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            CertificateAuthor::Device(device_id) => Some(device_id),
            CertificateAuthor::Root => None,
        }
    }
}

/// A certificate kind with a canonical signed byte form.
pub trait Certificate: Serialize + DeserializeOwned + Sized {
    /// Value of the payload's `type` entry.
    const TYPE: &'static str;

    /// Who signed this certificate.
    fn author(&self) -> CertificateAuthor;

    /// When the statement was made.
    fn timestamp(&self) -> Timestamp;

    /// Serialize and sign; the result is the canonical byte form.
    fn dump_and_sign(&self, author_signkey: &SigningKey) -> Vec<u8> {
        let payload = dump_payload(self);
        let mut out = author_signkey.sign(&payload).to_vec();
        out.extend_from_slice(&payload);
        out
    }

    /// Verify the signature and author, then decode.
    ///
    /// `expected_author` guards against a valid certificate submitted
    /// under someone else's session.
    fn verify_and_load(
        raw: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: Option<&CertificateAuthor>,
    ) -> Result<Self, CertifError> {
        let (signature, payload) = split_raw(raw)?;
        author_verify_key
            .verify(signature, payload)
            .map_err(|_| CertifError::Signature)?;
        let certificate = load_payload::<Self>(payload)?;
        if let Some(expected) = expected_author {
            if certificate.author() != *expected {
                return Err(CertifError::UnexpectedAuthor);
            }
        }
        Ok(certificate)
    }

    /// Decode without any signature check. Diagnostics only.
    fn unsecure_load(raw: &[u8]) -> Result<Unsecure<Self>, CertifError> {
        let (signature, payload) = split_raw(raw)?;
        let certificate = load_payload::<Self>(payload)?;
        Ok(Unsecure {
            certificate,
            signature: signature.try_into().map_err(|_| CertifError::Corrupted)?,
            payload: payload.to_vec(),
        })
    }
}

/// A decoded certificate whose signature has *not* been checked.
///
/// Keeps the raw payload so [`Unsecure::dump`] reproduces the exact
/// input bytes.
#[derive(Debug, Clone)]
pub struct Unsecure<C> {
    /// The decoded (untrusted) certificate.
    pub certificate: C,
    /// The unverified signature.
    pub signature: [u8; SIGNATURE_LEN],
    /// The raw payload bytes as received.
    pub payload: Vec<u8>,
}

impl<C> Unsecure<C> {
    /// Reassemble the canonical byte form.
    pub fn dump(&self) -> Vec<u8> {
        let mut out = self.signature.to_vec();
        out.extend_from_slice(&self.payload);
        out
    }
}

fn split_raw(raw: &[u8]) -> Result<(&[u8], &[u8]), CertifError> {
    if raw.len() <= SIGNATURE_LEN {
        return Err(CertifError::Corrupted);
    }
    Ok(raw.split_at(SIGNATURE_LEN))
}

#[derive(Serialize)]
struct TaggedRef<'a, C: Serialize> {
    #[serde(rename = "type")]
    ty: &'static str,
    #[serde(flatten)]
    data: &'a C,
}

#[derive(Deserialize)]
struct TaggedOwned<C> {
    #[serde(rename = "type")]
    ty: String,
    #[serde(flatten)]
    data: C,
}

fn dump_payload<C: Certificate>(certificate: &C) -> Vec<u8> {
    // String-keyed maps: the canonical form must stay stable across
    // field reordering in future struct definitions
    rmp_serde::to_vec_named(&TaggedRef {
        ty: C::TYPE,
        data: certificate,
    })
    .unwrap_or_default()
}

fn load_payload<C: Certificate>(payload: &[u8]) -> Result<C, CertifError> {
    let tagged: TaggedOwned<C> =
        rmp_serde::from_slice(payload).map_err(|_| CertifError::Corrupted)?;
    if tagged.ty != C::TYPE {
        return Err(CertifError::Corrupted);
    }
    Ok(tagged.data)
}

macro_rules! impl_certificate {
    ($cert:ty, $tag:literal) => {
        impl crate::envelope::Certificate for $cert {
            const TYPE: &'static str = $tag;

            fn author(&self) -> crate::envelope::CertificateAuthor {
                self.author.clone()
            }

            fn timestamp(&self) -> velum_core::time::Timestamp {
                self.timestamp
            }
        }
    };
}
pub(crate) use impl_certificate;

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};
    use velum_core::crypto::SigningKey;
    use velum_core::id::{DeviceId, UserId};
    use velum_core::time::Timestamp;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        author: CertificateAuthor,
        timestamp: Timestamp,
        user_id: UserId,
    }
    impl_certificate!(Probe, "probe");

    fn probe() -> Probe {
        Probe {
            author: CertificateAuthor::Device(DeviceId::new(
                UserId::new(),
                "dev1".parse().unwrap(),
            )),
            timestamp: Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            user_id: UserId::new(),
        }
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = SigningKey::generate();
        let cert = probe();
        let raw = cert.dump_and_sign(&key);

        let loaded =
            Probe::verify_and_load(&raw, &key.verify_key(), Some(&cert.author())).unwrap();
        assert_eq!(loaded, cert);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let raw = probe().dump_and_sign(&SigningKey::generate());
        let other = SigningKey::generate();
        assert_matches!(
            Probe::verify_and_load(&raw, &other.verify_key(), None),
            Err(CertifError::Signature)
        );
    }

    #[test]
    fn wrong_expected_author_is_rejected() {
        let key = SigningKey::generate();
        let raw = probe().dump_and_sign(&key);
        let expected = CertificateAuthor::Root;
        assert_matches!(
            Probe::verify_and_load(&raw, &key.verify_key(), Some(&expected)),
            Err(CertifError::UnexpectedAuthor)
        );
    }

    #[test]
    fn type_tag_prevents_cross_kind_replay() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct OtherProbe {
            author: CertificateAuthor,
            timestamp: Timestamp,
            user_id: UserId,
        }
        impl_certificate!(OtherProbe, "other_probe");

        let key = SigningKey::generate();
        let raw = probe().dump_and_sign(&key);
        assert_matches!(
            OtherProbe::verify_and_load(&raw, &key.verify_key(), None),
            Err(CertifError::Corrupted)
        );
    }

    #[test]
    fn unsecure_load_dump_is_identity() {
        let raw = probe().dump_and_sign(&SigningKey::generate());
        let unsecure = Probe::unsecure_load(&raw).unwrap();
        assert_eq!(unsecure.dump(), raw);
    }

    #[test]
    fn truncated_input_is_corrupted() {
        assert_matches!(Probe::unsecure_load(&[0u8; 10]), Err(CertifError::Corrupted));
    }

    proptest::proptest! {
        #[test]
        fn any_signed_certificate_survives_unsecure_reload(
            seed in proptest::array::uniform32(proptest::num::u8::ANY),
            micros in 0i64..4_102_444_800_000_000,
        ) {
            let key = SigningKey::from_bytes(&seed);
            let cert = Probe {
                author: CertificateAuthor::Root,
                timestamp: Timestamp::from_us(micros),
                user_id: UserId::new(),
            };
            let raw = cert.dump_and_sign(&key);
            let unsecure = Probe::unsecure_load(&raw).unwrap();
            proptest::prop_assert_eq!(unsecure.dump(), raw.clone());
            let loaded = Probe::verify_and_load(&raw, &key.verify_key(), None).unwrap();
            proptest::prop_assert_eq!(loaded, cert);
        }
    }
}
