//! ECDSA P-256 key handling for the Pyrite protocol.
//!
//! Public keys travel on the wire and in transaction inputs as the raw
//! concatenation of the X and Y curve coordinates (64 bytes, big-endian).
//! Signatures are the fixed-width `r || s` form (64 bytes). Output owners
//! are identified by `RIPEMD160(SHA256(pubkey))`.

use p256::EncodedPoint;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CryptoError;
use crate::types::PubKeyHash;

/// Serialized public key length: X coordinate || Y coordinate.
pub const PUB_KEY_LEN: usize = 64;

/// Serialized signature length: r || s.
pub const SIGNATURE_LEN: usize = 64;

/// ECDSA P-256 keypair for signing transaction inputs.
///
/// Wraps [`p256::ecdsa::SigningKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] to restore a persisted key.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::random(&mut csprng),
        }
    }

    /// Restore a keypair from 32-byte secret scalar material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_bytes(&bytes.into())
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The raw secret scalar bytes (32 bytes). Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Derive the public key from this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Sign a message, returning the fixed-width `r || s` signature.
    ///
    /// The message is hashed with SHA-256 as part of the ECDSA operation.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// ECDSA P-256 public key for verifying input signatures.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parse a public key from the raw `X || Y` coordinate form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUB_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(&raw));
        let verifying_key = VerifyingKey::from_encoded_point(&point)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// The raw `X || Y` coordinate form (64 bytes).
    pub fn to_bytes(&self) -> [u8; PUB_KEY_LEN] {
        let point = self.verifying_key.to_encoded_point(false);
        let mut out = [0u8; PUB_KEY_LEN];
        out[..32].copy_from_slice(point.x().expect("uncompressed point has an x coordinate"));
        out[32..].copy_from_slice(point.y().expect("uncompressed point has a y coordinate"));
        out
    }

    /// The RIPEMD160(SHA256(pubkey)) hash used to lock outputs.
    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash_pub_key(&self.to_bytes())
    }

    /// Verify an `r || s` signature over a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let sig = Signature::from_slice(signature)
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

/// Compute `RIPEMD160(SHA256(bytes))` over raw public key bytes.
///
/// Also applied to arbitrary coinbase input payloads, so it accepts any
/// byte slice rather than a parsed [`PublicKey`].
pub fn hash_pub_key(pub_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(pub_key);
    let ripe = Ripemd160::digest(sha);
    PubKeyHash(ripe.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_unique() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn from_secret_deterministic() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_secret_bytes(seed).unwrap();
        let kp2 = KeyPair::from_secret_bytes(seed).unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.secret_bytes(), kp2.secret_bytes());
    }

    #[test]
    fn from_secret_rejects_zero_scalar() {
        assert_eq!(
            KeyPair::from_secret_bytes([0u8; 32]).unwrap_err(),
            CryptoError::InvalidSecretKey
        );
    }

    #[test]
    fn secret_round_trip() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(kp.secret_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn pubkey_is_x_y_concatenation() {
        let kp = KeyPair::generate();
        let bytes = kp.public_key().to_bytes();
        assert_eq!(bytes.len(), PUB_KEY_LEN);
        let parsed = PublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, kp.public_key());
    }

    #[test]
    fn pubkey_from_short_bytes_fails() {
        assert_eq!(
            PublicKey::from_bytes(&[0u8; 63]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn pubkey_from_off_curve_bytes_fails() {
        // All-0xFF coordinates are not a valid P-256 point.
        assert_eq!(
            PublicKey::from_bytes(&[0xFF; 64]).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let msg = b"pay to the order of";
        let sig = kp.sign(msg);
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(kp.public_key().verify(msg, &sig).is_ok());
    }

    #[test]
    fn verify_wrong_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(kp.public_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn verify_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let sig = kp1.sign(b"message");
        assert!(kp2.public_key().verify(b"message", &sig).is_err());
    }

    #[test]
    fn verify_flipped_signature_byte_fails() {
        let kp = KeyPair::generate();
        let msg = b"message";
        let mut sig = kp.sign(msg);
        sig[10] ^= 0x01;
        assert!(kp.public_key().verify(msg, &sig).is_err());
    }

    #[test]
    fn hash_pub_key_is_20_bytes_and_deterministic() {
        let kp = KeyPair::from_secret_bytes([7u8; 32]).unwrap();
        let h1 = hash_pub_key(&kp.public_key().to_bytes());
        let h2 = kp.public_key().pub_key_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.as_bytes().len(), 20);
    }

    #[test]
    fn hash_pub_key_known_vector() {
        // RIPEMD160(SHA256("")) — standard empty-input vector.
        let h = hash_pub_key(b"");
        assert_eq!(
            hex::encode(h.as_bytes()),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn debug_hides_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{kp:?}");
        assert!(debug.contains("public_key"));
        assert!(!debug.contains(&hex::encode(kp.secret_bytes())));
    }
}
