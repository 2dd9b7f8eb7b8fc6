//! Blocks: a proof-of-work header over a merkle-committed transaction set.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::BlockError;
use crate::pow::ProofOfWork;
use crate::transaction::Transaction;
use crate::types::Hash256;

/// A block in the chain.
///
/// `hash` and `nonce` are produced by [`ProofOfWork`] over the other
/// fields. Blocks are immutable once persisted.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix timestamp (seconds) at mining time.
    pub timestamp: i64,
    /// Ordered transactions; the first is conventionally the coinbase.
    pub transactions: Vec<Transaction>,
    /// Header hash of the previous block; zero for genesis.
    pub prev_hash: Hash256,
    /// Winning proof-of-work hash of this block's header.
    pub hash: Hash256,
    /// Winning proof-of-work nonce.
    pub nonce: i64,
    /// Distance from genesis.
    pub height: u64,
}

impl Block {
    /// Mine a new block over `transactions` on top of `prev_hash`.
    ///
    /// Stamps the current epoch time and runs the proof-of-work search.
    pub fn new(
        transactions: Vec<Transaction>,
        prev_hash: Hash256,
        height: u64,
    ) -> Result<Self, BlockError> {
        if transactions.is_empty() {
            return Err(BlockError::NoTransactions);
        }

        let mut block = Self {
            timestamp: unix_now(),
            transactions,
            prev_hash,
            hash: Hash256::ZERO,
            nonce: 0,
            height,
        };

        let (nonce, hash) = ProofOfWork::new(&block)?.run();
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mine the genesis block: height 0, no predecessor, one coinbase.
    pub fn genesis(coinbase: Transaction) -> Result<Self, BlockError> {
        Self::new(vec![coinbase], Hash256::ZERO, 0)
    }

    /// Check whether this block's stored nonce satisfies the target.
    pub fn validate_pow(&self) -> Result<bool, BlockError> {
        Ok(ProofOfWork::new(self)?.validate())
    }

    /// Serialize with bincode standard config.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlockError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))
    }

    /// Deserialize from the bincode form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        let (block, _): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(block)
    }

    /// Serialized form of every transaction, the merkle leaves.
    pub(crate) fn tx_bytes(&self) -> Result<Vec<Vec<u8>>, BlockError> {
        self.transactions
            .iter()
            .map(|tx| {
                tx.to_bytes()
                    .map_err(|e| BlockError::Serialization(e.to_string()))
            })
            .collect()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
