//! Capability traits decoupling transaction construction from storage.
//!
//! Signing and verification need the referenced previous transactions, and
//! transfer construction needs the spendable-output index. Both are
//! expressed as traits so the wallet path can run against any backing store
//! (or none, for offline signing).

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::transaction::Transaction;
use crate::types::{Hash256, PubKeyHash};

/// Look up a transaction by id.
pub trait TxSource {
    /// Return the transaction with the given id, or [`StoreError::TxNotFound`].
    fn transaction(&self, id: &Hash256) -> Result<Transaction, StoreError>;
}

/// Read access to the spendable-output index.
pub trait UtxoView {
    /// Accumulate outputs locked to `pub_key_hash` until `amount` is covered.
    ///
    /// Returns the accumulated value and the selected output indices grouped
    /// by transaction id. The accumulated value may fall short of `amount`
    /// when the owner's spendable total is insufficient.
    fn spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u64>>), StoreError>;
}
