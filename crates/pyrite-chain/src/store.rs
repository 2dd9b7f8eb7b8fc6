//! RocksDB-backed persistent blockchain store.
//!
//! Blocks live in the `blocks` column family keyed by header hash, with the
//! well-known key `latest` pointing at the tip. The `chain_state` column
//! family holds the derived UTXO index (see [`crate::utxo`]). All mutations
//! go through an atomic [`WriteBatch`] and are flushed before success is
//! reported.

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use tracing::info;

use pyrite_core::block::Block;
use pyrite_core::constants::GENESIS_COINBASE_DATA;
use pyrite_core::crypto::KeyPair;
use pyrite_core::error::{PyriteError, StoreError, TxError};
use pyrite_core::traits::TxSource;
use pyrite_core::transaction::Transaction;
use pyrite_core::types::Hash256;

use crate::utxo::UtxoEntry;

pub(crate) const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_CHAIN_STATE: &str = "chain_state";

/// Well-known key in the `blocks` column family holding the tip hash.
const TIP_KEY: &[u8] = b"latest";

/// Persistent blockchain store.
///
/// The tip pointer is read from disk on every access rather than cached, so
/// a single store handle can be shared freely across threads; RocksDB
/// provides the multi-reader/single-writer semantics.
pub struct Blockchain {
    db: DB,
}

impl Blockchain {
    /// Create a fresh chain database at `path`, mining the genesis block
    /// with a coinbase paying `address`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the path is taken.
    pub fn create(path: impl AsRef<Path>, address: &str) -> Result<Self, PyriteError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.display().to_string()).into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let chain = Self {
            db: open_db(path)?,
        };

        let coinbase = Transaction::new_coinbase(address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::genesis(coinbase).map_err(PyriteError::Block)?;
        chain.put_block_and_tip(&genesis)?;
        info!(hash = %genesis.hash, "created chain database");

        Ok(chain)
    }

    /// Open an existing chain database at `path`.
    ///
    /// Fails with [`StoreError::NotFound`] when no database exists there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let chain = Self {
            db: open_db(path)?,
        };
        // The tip pointer must be present in a well-formed database.
        chain.tip_hash()?;
        Ok(chain)
    }

    /// The hash of the current tip block.
    pub fn tip_hash(&self) -> Result<Hash256, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let bytes = self
            .db
            .get_cf(cf, TIP_KEY)
            .map_err(|e| StoreError::Db(e.to_string()))?
            .ok_or_else(|| StoreError::BlockNotFound("tip".into()))?;
        let hash: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Db("malformed tip pointer".into()))?;
        Ok(Hash256(hash))
    }

    /// The current tip block.
    pub fn tip(&self) -> Result<Block, StoreError> {
        self.block_by_hash(&self.tip_hash()?)
    }

    /// Height of the tip block.
    pub fn best_height(&self) -> Result<u64, StoreError> {
        Ok(self.tip()?.height)
    }

    /// Look up a block by its header hash.
    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Block, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let data = self
            .db
            .get_cf(cf, hash.as_bytes())
            .map_err(|e| StoreError::Db(e.to_string()))?
            .ok_or_else(|| StoreError::BlockNotFound(hash.to_string()))?;
        Block::from_bytes(&data).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Verify every transaction, then mine a new tip block over them.
    ///
    /// The caller supplies exactly one coinbase, in first position; any
    /// other arrangement is a [`TxError::CoinbaseShape`] violation.
    pub fn mine(&self, txs: Vec<Transaction>) -> Result<Block, PyriteError> {
        for tx in &txs {
            if !self.verify_tx(tx)? {
                return Err(TxError::Invalid(tx.id.to_hex()).into());
            }
        }
        check_coinbase_placement(&txs)?;

        let tip = self.tip().map_err(PyriteError::Store)?;
        let block =
            Block::new(txs, tip.hash, tip.height + 1).map_err(PyriteError::Block)?;
        self.put_block_and_tip(&block)?;
        info!(hash = %block.hash, height = block.height, "mined block");
        Ok(block)
    }

    /// Persist a block received from a peer. Idempotent.
    ///
    /// The tip pointer moves only when the new block is strictly higher than
    /// the current tip. Transactions inside the block are not re-verified
    /// here; the proof of work and the submitting caller vouch for them.
    pub fn submit(&self, block: &Block) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        if self
            .db
            .get_cf(cf, block.hash.as_bytes())
            .map_err(|e| StoreError::Db(e.to_string()))?
            .is_some()
        {
            return Ok(());
        }

        let bytes = block
            .to_bytes()
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        let tip = self.tip()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, block.hash.as_bytes(), bytes);
        if block.height > tip.height {
            batch.put_cf(cf, TIP_KEY, block.hash.as_bytes());
        }
        self.write(batch)
    }

    /// Hashes of every block, tip to genesis.
    pub fn block_hashes(&self) -> Result<Vec<Hash256>, StoreError> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Linear scan for a transaction by id, tip to genesis.
    pub fn transaction_by_id(&self, id: &Hash256) -> Result<Transaction, StoreError> {
        for block in self.iter()? {
            let block = block?;
            if let Some(tx) = block.transactions.iter().find(|tx| tx.id == *id) {
                return Ok(tx.clone());
            }
        }
        Err(StoreError::TxNotFound(id.to_string()))
    }

    /// Full-replay reconstruction of the unspent output set.
    ///
    /// Walking tip to genesis, a spend is always seen before the output it
    /// consumes, so outputs already recorded as spent are skipped.
    pub fn collect_utxo(&self) -> Result<HashMap<Hash256, Vec<UtxoEntry>>, StoreError> {
        let mut unspent: HashMap<Hash256, Vec<UtxoEntry>> = HashMap::new();
        let mut spent: HashMap<Hash256, Vec<u64>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;
            for tx in &block.transactions {
                for (index, output) in tx.vout.iter().enumerate() {
                    let vout = index as u64;
                    if spent
                        .get(&tx.id)
                        .is_some_and(|vouts| vouts.contains(&vout))
                    {
                        continue;
                    }
                    unspent.entry(tx.id).or_default().push(UtxoEntry {
                        vout,
                        output: output.clone(),
                    });
                }
                if !tx.is_coinbase() {
                    for input in &tx.vin {
                        spent
                            .entry(input.previous_output.txid)
                            .or_default()
                            .push(input.previous_output.vout);
                    }
                }
            }
        }

        Ok(unspent)
    }

    /// Iterate blocks tip to genesis with an external cursor.
    ///
    /// No database transaction is held between steps, so callbacks may
    /// freely read or write the store.
    pub fn iter(&self) -> Result<BlockIter<'_>, StoreError> {
        Ok(BlockIter {
            chain: self,
            current: self.tip_hash()?,
        })
    }

    /// Run `f` over every block, tip to genesis, stopping on the first error.
    pub fn for_each(
        &self,
        mut f: impl FnMut(&Block) -> Result<(), PyriteError>,
    ) -> Result<(), PyriteError> {
        for block in self.iter()? {
            f(&block?)?;
        }
        Ok(())
    }

    /// Sign a transaction's inputs, resolving previous transactions from
    /// this chain.
    pub fn sign_tx(&self, tx: &mut Transaction, keypair: &KeyPair) -> Result<(), PyriteError> {
        let prev_txs = tx.referenced_transactions(self)?;
        tx.sign(keypair, &prev_txs)?;
        Ok(())
    }

    /// Verify a transaction's input signatures against this chain.
    ///
    /// A missing previous transaction makes the transaction invalid rather
    /// than erroring: peers may relay spends of blocks we do not have yet.
    pub fn verify_tx(&self, tx: &Transaction) -> Result<bool, PyriteError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = match tx.referenced_transactions(self) {
            Ok(prev_txs) => prev_txs,
            Err(StoreError::TxNotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(tx.verify(&prev_txs)?)
    }

    // --- Internal helpers ---

    pub(crate) fn db(&self) -> &DB {
        &self.db
    }

    pub(crate) fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Db(format!("missing column family: {name}")))
    }

    pub(crate) fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Db(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Db(e.to_string()))
    }

    fn put_block_and_tip(&self, block: &Block) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let bytes = block
            .to_bytes()
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, block.hash.as_bytes(), bytes);
        batch.put_cf(cf, TIP_KEY, block.hash.as_bytes());
        self.write(batch)
    }
}

impl TxSource for Blockchain {
    fn transaction(&self, id: &Hash256) -> Result<Transaction, StoreError> {
        self.transaction_by_id(id)
    }
}

/// A mined block carries exactly one coinbase, placed first by the miner.
///
/// Coinbase inputs skip signature verification entirely, so a stray
/// coinbase-shaped transaction smuggled into the list would mint value
/// from nothing.
fn check_coinbase_placement(txs: &[Transaction]) -> Result<(), TxError> {
    match txs.first() {
        Some(first) if first.is_coinbase() => {}
        _ => {
            return Err(TxError::CoinbaseShape(
                "first transaction must be the coinbase".into(),
            ));
        }
    }
    for tx in &txs[1..] {
        if tx.is_coinbase() {
            return Err(TxError::CoinbaseShape(format!(
                "extra coinbase {}",
                tx.id.to_hex()
            )));
        }
    }
    Ok(())
}

fn open_db(path: &Path) -> Result<DB, StoreError> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHAIN_STATE, Options::default()),
    ];
    DB::open_cf_descriptors(&opts, path, cfs).map_err(|e| StoreError::Db(e.to_string()))
}

/// External-cursor iterator over blocks, tip to genesis.
///
/// Terminates when a block's `prev_hash` is zero or its key is missing.
pub struct BlockIter<'a> {
    chain: &'a Blockchain,
    current: Hash256,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_zero() {
            return None;
        }
        match self.chain.block_by_hash(&self.current) {
            Ok(block) => {
                self.current = block.prev_hash;
                Some(Ok(block))
            }
            Err(StoreError::BlockNotFound(_)) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_core::address;

    fn new_address() -> String {
        let kp = KeyPair::generate();
        address::make_address(&kp.public_key().to_bytes())
    }

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain_3000.db");
        let addr = new_address();

        let chain = Blockchain::create(&path, &addr).unwrap();
        assert_eq!(chain.best_height().unwrap(), 0);
        drop(chain);

        let reopened = Blockchain::open(&path).unwrap();
        assert_eq!(reopened.best_height().unwrap(), 0);
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockchain_3000.db");
        let addr = new_address();

        Blockchain::create(&path, &addr).unwrap();
        let err = Blockchain::create(&path, &addr).unwrap_err();
        assert!(matches!(
            err,
            PyriteError::Store(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Blockchain::open(dir.path().join("nope.db")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn genesis_pays_creator_the_subsidy() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();

        let genesis = chain.tip().unwrap();
        assert_eq!(genesis.height, 0);
        assert!(genesis.prev_hash.is_zero());
        assert_eq!(genesis.transactions.len(), 1);
        let coinbase = &genesis.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.vin[0].pub_key, GENESIS_COINBASE_DATA.as_bytes());
        assert_eq!(
            coinbase.vout[0].pub_key_hash,
            address::pub_key_hash_of(&addr).unwrap()
        );
    }

    #[test]
    fn iteration_counts_blocks_with_decreasing_heights() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();

        for _ in 0..3 {
            let coinbase = Transaction::new_coinbase(&addr, "").unwrap();
            chain.mine(vec![coinbase]).unwrap();
        }

        let blocks: Vec<Block> = chain.iter().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 4);
        let heights: Vec<u64> = blocks.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![3, 2, 1, 0]);
    }

    #[test]
    fn mine_links_to_previous_tip() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();
        let genesis_hash = chain.tip_hash().unwrap();

        let coinbase = Transaction::new_coinbase(&addr, "").unwrap();
        let block = chain.mine(vec![coinbase]).unwrap();
        assert_eq!(block.prev_hash, genesis_hash);
        assert_eq!(block.height, 1);
        assert_eq!(chain.tip_hash().unwrap(), block.hash);
    }

    #[test]
    fn mine_rejects_unverifiable_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();

        // References a transaction the chain has never seen.
        let mut bogus = Transaction {
            id: Hash256::ZERO,
            vin: vec![pyrite_core::transaction::TxInput {
                previous_output: pyrite_core::types::OutPoint {
                    txid: Hash256([0x99; 32]),
                    vout: 0,
                },
                signature: vec![0; 64],
                pub_key: vec![0; 64],
            }],
            vout: vec![],
        };
        bogus.id = bogus.hash().unwrap();

        let err = chain.mine(vec![bogus]).unwrap_err();
        assert!(matches!(err, PyriteError::Tx(TxError::Invalid(_))));
        assert_eq!(chain.best_height().unwrap(), 0);
    }

    #[test]
    fn mine_requires_leading_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let sender = KeyPair::generate();
        let sender_addr = address::make_address(&sender.public_key().to_bytes());
        let chain = Blockchain::create(dir.path().join("db"), &sender_addr).unwrap();
        let index = crate::utxo::UtxoIndex::new(&chain);
        index.rebuild().unwrap();

        // A perfectly valid transfer, but no coinbase in front of it.
        let transfer =
            Transaction::new_transfer(&sender, &new_address(), 4, &index, &chain).unwrap();
        let err = chain.mine(vec![transfer]).unwrap_err();
        assert!(matches!(err, PyriteError::Tx(TxError::CoinbaseShape(_))));
        assert_eq!(chain.best_height().unwrap(), 0);
    }

    #[test]
    fn mine_rejects_second_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();

        // A smuggled extra coinbase would mint a second untaxed subsidy.
        let legit = Transaction::new_coinbase(&addr, "").unwrap();
        let smuggled = Transaction::new_coinbase(&new_address(), "").unwrap();
        let err = chain.mine(vec![legit, smuggled]).unwrap_err();
        assert!(matches!(err, PyriteError::Tx(TxError::CoinbaseShape(_))));
        assert_eq!(chain.best_height().unwrap(), 0);
    }

    #[test]
    fn submit_is_idempotent_and_height_gated() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let addr = new_address();

        let chain_a = Blockchain::create(dir_a.path().join("db"), &addr).unwrap();
        let chain_b = Blockchain::create(dir_b.path().join("db"), &addr).unwrap();

        let coinbase = Transaction::new_coinbase(&addr, "").unwrap();
        let block1 = chain_a.mine(vec![coinbase]).unwrap();
        let coinbase = Transaction::new_coinbase(&addr, "").unwrap();
        let block2 = chain_a.mine(vec![coinbase]).unwrap();

        // Foreign blocks land on chain B out of band.
        chain_b.submit(&block2).unwrap();
        assert_eq!(chain_b.tip_hash().unwrap(), block2.hash);

        // A lower block is stored but does not move the tip.
        chain_b.submit(&block1).unwrap();
        assert_eq!(chain_b.tip_hash().unwrap(), block2.hash);
        assert!(chain_b.block_by_hash(&block1.hash).is_ok());

        // Resubmission is a no-op.
        chain_b.submit(&block2).unwrap();
        assert_eq!(chain_b.tip_hash().unwrap(), block2.hash);
    }

    #[test]
    fn transaction_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();

        let genesis_coinbase = chain.tip().unwrap().transactions[0].clone();
        let found = chain.transaction_by_id(&genesis_coinbase.id).unwrap();
        assert_eq!(found, genesis_coinbase);

        let missing = chain.transaction_by_id(&Hash256([0xEE; 32]));
        assert!(matches!(missing, Err(StoreError::TxNotFound(_))));
    }

    #[test]
    fn block_hashes_run_tip_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let addr = new_address();
        let chain = Blockchain::create(dir.path().join("db"), &addr).unwrap();
        let genesis_hash = chain.tip_hash().unwrap();

        let coinbase = Transaction::new_coinbase(&addr, "").unwrap();
        let block = chain.mine(vec![coinbase]).unwrap();

        let hashes = chain.block_hashes().unwrap();
        assert_eq!(hashes, vec![block.hash, genesis_hash]);
    }
}
