//! Proof-of-work over block headers.
//!
//! The header preimage is `prev_hash || merkle_root || be64(timestamp) ||
//! be64(TARGET_BITS) || be64(nonce)`. A nonce wins when the SHA-256 of the
//! preimage, read as a 256-bit big-endian integer, is below the fixed
//! target `1 << (256 - TARGET_BITS)`.

use sha2::{Digest, Sha256};

use crate::block::Block;
use crate::error::BlockError;
use crate::merkle;
use crate::types::Hash256;

/// Number of leading zero bits a winning hash must carry.
pub const TARGET_BITS: i64 = 16;

/// Upper bound on the nonce search.
pub const MAX_NONCE: i64 = i64::MAX;

/// Proof-of-work context for one block.
///
/// The merkle root over the block's transactions is computed once at
/// construction; each nonce attempt costs a single SHA-256.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Hash256,
    target: [u8; 32],
}

impl<'a> ProofOfWork<'a> {
    /// Prepare the PoW context for `block`.
    pub fn new(block: &'a Block) -> Result<Self, BlockError> {
        let tx_bytes = block.tx_bytes()?;
        Ok(Self {
            block,
            merkle_root: merkle::merkle_root(&tx_bytes),
            target: target_bytes(),
        })
    }

    /// Search nonces from zero upward; returns the first winning nonce and
    /// its hash.
    pub fn run(&self) -> (i64, Hash256) {
        let mut nonce: i64 = 0;
        while nonce < MAX_NONCE {
            let hash = self.hash_with(nonce);
            if hash.as_bytes() < &self.target {
                return (nonce, hash);
            }
            nonce += 1;
        }
        (nonce, self.hash_with(nonce))
    }

    /// Recompute the hash with the block's stored nonce and compare it to
    /// the target.
    pub fn validate(&self) -> bool {
        self.hash_with(self.block.nonce).as_bytes() < &self.target
    }

    fn hash_with(&self, nonce: i64) -> Hash256 {
        Hash256(Sha256::digest(self.prepare_data(nonce)).into())
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 * 3);
        data.extend_from_slice(self.block.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&TARGET_BITS.to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }
}

/// The target `1 << (256 - TARGET_BITS)` as a big-endian 32-byte value.
fn target_bytes() -> [u8; 32] {
    let bit = 256 - TARGET_BITS as usize;
    let mut target = [0u8; 32];
    target[31 - bit / 8] = 1 << (bit % 8);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;
    use crate::crypto::KeyPair;
    use crate::transaction::Transaction;

    fn mined_block() -> Block {
        let kp = KeyPair::generate();
        let addr = address::make_address(&kp.public_key().to_bytes());
        let coinbase = Transaction::new_coinbase(&addr, "pow test").unwrap();
        Block::new(vec![coinbase], Hash256::ZERO, 0).unwrap()
    }

    #[test]
    fn target_has_sixteen_leading_zero_bits() {
        let target = target_bytes();
        assert_eq!(target[0], 0);
        assert_eq!(target[1], 1);
        assert!(target[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mined_block_validates() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(pow.validate());
    }

    #[test]
    fn winning_hash_starts_with_two_zero_bytes() {
        let block = mined_block();
        assert_eq!(block.hash.as_bytes()[0], 0);
        assert_eq!(block.hash.as_bytes()[1], 0);
    }

    #[test]
    fn stored_hash_matches_recomputation() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block).unwrap();
        assert_eq!(pow.hash_with(block.nonce), block.hash);
    }

    #[test]
    fn flipped_nonce_invalidates() {
        let mut block = mined_block();
        block.nonce ^= 1;
        let pow = ProofOfWork::new(&block).unwrap();
        // A single different nonce almost surely misses a 1-in-65536 target.
        assert!(!pow.validate());
    }

    #[test]
    fn flipped_prev_hash_invalidates() {
        let mut block = mined_block();
        block.prev_hash.0[0] ^= 0xFF;
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(!pow.validate());
    }

    #[test]
    fn flipped_timestamp_invalidates() {
        let mut block = mined_block();
        block.timestamp ^= 1;
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(!pow.validate());
    }

    #[test]
    fn changed_transaction_set_invalidates() {
        let mut block = mined_block();
        let kp = KeyPair::generate();
        let addr = address::make_address(&kp.public_key().to_bytes());
        block
            .transactions
            .push(Transaction::new_coinbase(&addr, "extra").unwrap());
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(!pow.validate());
    }
}
