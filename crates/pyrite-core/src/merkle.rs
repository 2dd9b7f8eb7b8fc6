//! SHA-256 Merkle tree committing a block to its ordered transaction set.
//!
//! Leaves are `SHA256(tx_bytes)`; internal nodes are `SHA256(left || right)`.
//! Layers with an odd number of entries duplicate their last element.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Compute the Merkle root over an ordered list of transaction serializations.
///
/// Blocks always contain at least a coinbase, so the input is never empty;
/// an empty input has no defined root.
pub fn merkle_root(tx_bytes: &[Vec<u8>]) -> Hash256 {
    debug_assert!(!tx_bytes.is_empty(), "merkle root of an empty set is undefined");

    let mut layer: Vec<Hash256> = tx_bytes
        .iter()
        .map(|bytes| Hash256(Sha256::digest(bytes).into()))
        .collect();

    while layer.len() > 1 {
        layer = next_layer(&layer);
    }

    layer.first().copied().unwrap_or(Hash256::ZERO)
}

/// Pair adjacent hashes, duplicating the last one when the layer is odd.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        let mut hasher = Sha256::new();
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        next.push(Hash256(hasher.finalize().into()));
        i += 2;
    }
    next
}
