//! Derived index of spendable outputs, keyed by transaction id.
//!
//! The `chain_state` column family maps each txid to the list of its
//! still-unspent outputs. Entries keep their original output index so that
//! partially-spent transactions stay addressable; the index is rebuildable
//! from a full chain replay and updated incrementally per accepted block.

use std::collections::{BTreeMap, HashMap};

use rocksdb::{IteratorMode, WriteBatch};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pyrite_core::block::Block;
use pyrite_core::error::{PyriteError, StoreError};
use pyrite_core::traits::UtxoView;
use pyrite_core::transaction::TxOutput;
use pyrite_core::types::{Hash256, PubKeyHash};

use crate::store::{Blockchain, CF_CHAIN_STATE};

/// An unspent output together with its index in the owning transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// Output index within the owning transaction.
    pub vout: u64,
    /// The unspent output itself.
    pub output: TxOutput,
}

/// View over the `chain_state` column family of a [`Blockchain`].
pub struct UtxoIndex<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoIndex<'a> {
    /// Wrap the index view around a chain store.
    pub fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    /// Throw away the index and rewrite it from a full chain replay.
    ///
    /// The deletion of stale keys and the insertion of the fresh map happen
    /// in a single atomic batch.
    pub fn rebuild(&self) -> Result<(), PyriteError> {
        let fresh = self.chain.collect_utxo()?;

        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;
        let mut batch = WriteBatch::default();
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Db(e.to_string()))?;
            batch.delete_cf(cf, key);
        }
        for (txid, entries) in &fresh {
            batch.put_cf(cf, txid.as_bytes(), encode_entries(entries)?);
        }
        self.chain.write(batch)?;
        debug!(entries = fresh.len(), "rebuilt utxo index");
        Ok(())
    }

    /// Scan the index in key order, accumulating outputs locked to
    /// `pub_key_hash` until `amount` is covered.
    ///
    /// Returns the accumulated value (possibly short of `amount`) and the
    /// selected output indices grouped by transaction id.
    pub fn spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u64>>), StoreError> {
        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;
        let mut accumulated = 0u64;
        let mut selected: BTreeMap<Hash256, Vec<u64>> = BTreeMap::new();

        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Db(e.to_string()))?;
            let txid = decode_txid(&key)?;
            for entry in decode_entries(&value)? {
                if entry.output.is_locked_with(pub_key_hash) && accumulated < amount {
                    accumulated += entry.output.value;
                    selected.entry(txid).or_default().push(entry.vout);
                }
            }
            if accumulated >= amount {
                break;
            }
        }

        Ok((accumulated, selected))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn utxos_for(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>, StoreError> {
        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;
        let mut outputs = Vec::new();

        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Db(e.to_string()))?;
            for entry in decode_entries(&value)? {
                if entry.output.is_locked_with(pub_key_hash) {
                    outputs.push(entry.output);
                }
            }
        }

        Ok(outputs)
    }

    /// The entire index as a map, mainly for inspection and tests.
    pub fn utxos(&self) -> Result<HashMap<Hash256, Vec<UtxoEntry>>, StoreError> {
        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;
        let mut all = HashMap::new();

        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Db(e.to_string()))?;
            all.insert(decode_txid(&key)?, decode_entries(&value)?);
        }

        Ok(all)
    }

    /// Number of transactions with at least one unspent output.
    pub fn tx_count(&self) -> Result<usize, StoreError> {
        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;
        let mut count = 0;
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::Db(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    /// Apply a newly accepted tip block to the index.
    ///
    /// Transactions are processed in block order and each transaction's
    /// spends are applied before its outputs are inserted, so a block may
    /// spend outputs created earlier in the same block. The whole update is
    /// committed as one atomic batch; reads during processing go through an
    /// overlay so they observe the pending mutations.
    pub fn update(&self, block: &Block) -> Result<(), StoreError> {
        let cf = self.chain.cf_handle(CF_CHAIN_STATE)?;

        // txid -> pending entry list; None marks deletion.
        let mut overlay: HashMap<Hash256, Option<Vec<UtxoEntry>>> = HashMap::new();

        let read = |overlay: &HashMap<Hash256, Option<Vec<UtxoEntry>>>,
                    txid: &Hash256|
         -> Result<Vec<UtxoEntry>, StoreError> {
            if let Some(pending) = overlay.get(txid) {
                return Ok(pending.clone().unwrap_or_default());
            }
            match self
                .chain
                .db()
                .get_cf(cf, txid.as_bytes())
                .map_err(|e| StoreError::Db(e.to_string()))?
            {
                Some(bytes) => decode_entries(&bytes),
                None => Ok(Vec::new()),
            }
        };

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.vin {
                    let txid = input.previous_output.txid;
                    let mut entries = read(&overlay, &txid)?;
                    entries.retain(|entry| entry.vout != input.previous_output.vout);
                    let pending = if entries.is_empty() { None } else { Some(entries) };
                    overlay.insert(txid, pending);
                }
            }

            let created: Vec<UtxoEntry> = tx
                .vout
                .iter()
                .enumerate()
                .map(|(index, output)| UtxoEntry {
                    vout: index as u64,
                    output: output.clone(),
                })
                .collect();
            overlay.insert(tx.id, Some(created));
        }

        let mut batch = WriteBatch::default();
        for (txid, pending) in &overlay {
            match pending {
                Some(entries) => {
                    batch.put_cf(cf, txid.as_bytes(), encode_entries(entries)?)
                }
                None => batch.delete_cf(cf, txid.as_bytes()),
            }
        }
        self.chain.write(batch)
    }
}

impl UtxoView for UtxoIndex<'_> {
    fn spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u64>>), StoreError> {
        UtxoIndex::spendable(self, pub_key_hash, amount)
    }
}

fn encode_entries(entries: &[UtxoEntry]) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(entries, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode_entries(bytes: &[u8]) -> Result<Vec<UtxoEntry>, StoreError> {
    let (entries, _): (Vec<UtxoEntry>, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(entries)
}

fn decode_txid(key: &[u8]) -> Result<Hash256, StoreError> {
    let hash: [u8; 32] = key
        .try_into()
        .map_err(|_| StoreError::Db("malformed utxo key".into()))?;
    Ok(Hash256(hash))
}
