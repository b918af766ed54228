//! Thin wrappers around the cryptographic primitives.
//!
//! The primitives themselves are black boxes; these wrappers pin the
//! byte formats the rest of the system depends on:
//! a 64-byte detached ed25519 signature, an AEAD ciphertext with the
//! 24-byte nonce prepended, and a 32-byte keyed hash.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signer, Verifier};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

/// Byte length of a detached signature.
pub const SIGNATURE_LEN: usize = 64;

/// Byte length of a verify key.
pub const VERIFY_KEY_LEN: usize = 32;

/// Byte length of a secret key.
pub const SECRET_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 24;

/// Errors from the crypto wrappers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Signature does not verify or is malformed.
    #[error("invalid signature")]
    Signature,
    /// Ciphertext failed authentication or is truncated.
    #[error("decryption failed")]
    Decryption,
    /// A key had the wrong length.
    #[error("invalid key size")]
    KeySize,
}

/// Ed25519 signing key of a device.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    /// Draw a fresh random key.
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Rebuild from the 32-byte seed.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(bytes))
    }

    /// The matching verify key.
    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey(self.0.verifying_key())
    }

    /// Detached signature over `data`.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.0.sign(data).to_bytes()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Ed25519 public key identifying a device (or an organization root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_bytes::ByteBuf", into = "serde_bytes::ByteBuf")]
pub struct VerifyKey(ed25519_dalek::VerifyingKey);

impl VerifyKey {
    /// Rebuild from the 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: &[u8; VERIFY_KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::KeySize)?;
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::KeySize)
    }

    /// The 32 raw bytes.
    pub fn to_bytes(&self) -> [u8; VERIFY_KEY_LEN] {
        self.0.to_bytes()
    }

    /// Verify a detached signature over `data`.
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> Result<(), CryptoError> {
        let signature: &[u8; SIGNATURE_LEN] =
            signature.try_into().map_err(|_| CryptoError::Signature)?;
        self.0
            .verify(data, &ed25519_dalek::Signature::from_bytes(signature))
            .map_err(|_| CryptoError::Signature)
    }
}

impl TryFrom<serde_bytes::ByteBuf> for VerifyKey {
    type Error = CryptoError;

    fn try_from(value: serde_bytes::ByteBuf) -> Result<Self, Self::Error> {
        Self::from_bytes(&value)
    }
}

impl From<VerifyKey> for serde_bytes::ByteBuf {
    fn from(value: VerifyKey) -> Self {
        serde_bytes::ByteBuf::from(value.to_bytes().to_vec())
    }
}

/// Symmetric AEAD key (XChaCha20-Poly1305).
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Draw a fresh random key.
    pub fn generate() -> Self {
        Self(XChaCha20Poly1305::generate_key(&mut AeadOsRng).into())
    }

    /// Rebuild from the 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes.try_into().map(Self).map_err(|_| CryptoError::KeySize)
    }

    /// Encrypt; the random nonce is prepended to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
        let mut out = nonce.to_vec();
        // Encryption with a fresh nonce and a valid key cannot fail
        let ciphertext = cipher.encrypt(&nonce, plaintext).unwrap_or_default();
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt a ciphertext produced by [`SecretKey::encrypt`].
    pub fn decrypt(&self, ciphered: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphered.len() < NONCE_LEN {
            return Err(CryptoError::Decryption);
        }
        let (nonce, ciphertext) = ciphered.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Blake3 content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "serde_bytes::ByteBuf", into = "serde_bytes::ByteBuf")]
pub struct HashDigest([u8; 32]);

impl HashDigest {
    /// Hash `data`.
    pub fn from_data(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// The 32 raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<serde_bytes::ByteBuf> for HashDigest {
    type Error = CryptoError;

    fn try_from(value: serde_bytes::ByteBuf) -> Result<Self, Self::Error> {
        value
            .as_slice()
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::KeySize)
    }
}

impl From<HashDigest> for serde_bytes::ByteBuf {
    fn from(value: HashDigest) -> Self {
        serde_bytes::ByteBuf::from(value.0.to_vec())
    }
}

/// HKDF-SHA256 expansion of a root secret into per-purpose subkeys.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyDerivation([u8; SECRET_KEY_LEN]);

impl KeyDerivation {
    /// Draw a fresh random root secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        Self(bytes)
    }

    /// Rebuild from the 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        bytes.try_into().map(Self).map_err(|_| CryptoError::KeySize)
    }

    /// Derive the subkey for `purpose`.
    pub fn derive_secret_key(&self, purpose: &[u8]) -> SecretKey {
        let hk = Hkdf::<Sha256>::new(None, &self.0);
        let mut okm = [0u8; SECRET_KEY_LEN];
        // 32-byte output is always a valid HKDF-SHA256 length
        let _ = hk.expand(purpose, &mut okm);
        SecretKey(okm)
    }
}

impl std::fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyDerivation(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"payload");
        assert!(sk.verify_key().verify(&sig, b"payload").is_ok());
        assert!(sk.verify_key().verify(&sig, b"tampered").is_err());
        assert!(SigningKey::generate()
            .verify_key()
            .verify(&sig, b"payload")
            .is_err());
    }

    #[test]
    fn seal_and_open() {
        let key = SecretKey::generate();
        let ciphered = key.encrypt(b"secret");
        assert_eq!(key.decrypt(&ciphered).unwrap(), b"secret");
        assert!(SecretKey::generate().decrypt(&ciphered).is_err());
        assert!(key.decrypt(&ciphered[..10]).is_err());
    }

    #[test]
    fn derived_keys_differ_per_purpose() {
        let root = KeyDerivation::generate();
        let a = root.derive_secret_key(b"vault");
        let b = root.derive_secret_key(b"web");
        let sealed = a.encrypt(b"x");
        assert!(b.decrypt(&sealed).is_err());
        assert_eq!(a.decrypt(&sealed).unwrap(), b"x");
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(
            HashDigest::from_data(b"abc"),
            HashDigest::from_data(b"abc")
        );
        assert_ne!(HashDigest::from_data(b"abc"), HashDigest::from_data(b"abd"));
    }
}
