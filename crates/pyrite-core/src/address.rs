//! Base58Check address encoding.
//!
//! An address is `base58(version || pubkey_hash || checksum)` where the
//! version byte is `0x00`, the pubkey hash is the 20-byte
//! RIPEMD160(SHA256(pubkey)) digest, and the checksum is the first four
//! bytes of SHA256(SHA256(version || pubkey_hash)).

use sha2::{Digest, Sha256};

use crate::crypto::hash_pub_key;
use crate::error::AddressError;
use crate::types::PubKeyHash;

/// Address version byte.
pub const VERSION: u8 = 0x00;

/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// Expected length of a rendered address string.
pub const ADDRESS_LEN: usize = 34;

/// Derive an address from raw public key bytes.
pub fn make_address(pub_key: &[u8]) -> String {
    encode_pub_key_hash(&hash_pub_key(pub_key))
}

/// Encode an already-computed pubkey hash as an address string.
pub fn encode_pub_key_hash(pub_key_hash: &PubKeyHash) -> String {
    let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(pub_key_hash.as_bytes());
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Check that an address is well-formed: 34 characters, base58-decodable
/// to at least 25 bytes, and carrying a checksum that recomputes exactly.
pub fn validate(address: &str) -> bool {
    if address.len() != ADDRESS_LEN {
        return false;
    }
    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if decoded.len() < 25 {
        return false;
    }
    let (payload, actual) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    checksum(payload)[..] == *actual
}

/// Extract the 20-byte pubkey hash encoded in an address.
pub fn pub_key_hash_of(address: &str) -> Result<PubKeyHash, AddressError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| AddressError::Decode(e.to_string()))?;
    if decoded.len() < 1 + CHECKSUM_LEN {
        return Err(AddressError::InvalidLength(decoded.len()));
    }
    let hash = &decoded[1..decoded.len() - CHECKSUM_LEN];
    let hash: [u8; 20] = hash
        .try_into()
        .map_err(|_| AddressError::InvalidLength(decoded.len()))?;
    Ok(PubKeyHash(hash))
}

/// First four bytes of SHA256(SHA256(payload)).
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}
