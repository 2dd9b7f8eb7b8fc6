//! Transactions: inputs, outputs, coinbases, signing, and verification.
//!
//! A transaction id is the SHA-256 of its serialization with the id field
//! cleared. Each non-coinbase input is signed over a *trimmed copy* of the
//! transaction: inputs keep only their outpoints, and the input under
//! signature carries the referenced output's pubkey hash in its pubkey
//! slot. The trimmed copy is serialized, rendered as lowercase hex followed
//! by a newline, and that byte string is what ECDSA signs.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::address;
use crate::constants::{COINBASE_NOTE_LEN, SUBSIDY};
use crate::crypto::{KeyPair, PublicKey, hash_pub_key};
use crate::error::{AddressError, PyriteError, StoreError, TxError};
use crate::traits::{TxSource, UtxoView};
use crate::types::{Hash256, OutPoint, PubKeyHash};

/// A transaction input, spending a previous output.
///
/// Coinbase inputs carry the null outpoint, no signature, and an arbitrary
/// payload (the mining note) in `pub_key`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// ECDSA `r || s` signature (64 bytes). Empty until signed.
    pub signature: Vec<u8>,
    /// Raw signer public key (`X || Y`, 64 bytes), or the coinbase note.
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Check whether this input was created by the owner of `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        hash_pub_key(&self.pub_key) == *pub_key_hash
    }
}

/// A transaction output, locked to a pubkey hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Amount carried by this output.
    pub value: u64,
    /// RIPEMD160(SHA256(pubkey)) of the owner.
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Create an output of `value` locked to the given address.
    pub fn locked_to(value: u64, addr: &str) -> Result<Self, AddressError> {
        Ok(Self {
            value,
            pub_key_hash: address::pub_key_hash_of(addr)?,
        })
    }

    /// Check whether the output is spendable by the owner of `pub_key_hash`.
    pub fn is_locked_with(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }
}

/// A transfer of value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// SHA-256 of the serialized transaction with this field cleared.
    pub id: Hash256,
    /// Inputs consuming previous outputs.
    pub vin: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub vout: Vec<TxOutput>,
}

impl Transaction {
    /// Create a coinbase transaction paying the block subsidy to `to`.
    ///
    /// An empty `note` is replaced by 20 random bytes rendered as hex.
    pub fn new_coinbase(to: &str, note: &str) -> Result<Self, PyriteError> {
        let note = if note.is_empty() {
            let mut buf = [0u8; COINBASE_NOTE_LEN];
            rand::rngs::OsRng.fill_bytes(&mut buf);
            hex::encode(buf)
        } else {
            note.to_string()
        };

        let input = TxInput {
            previous_output: OutPoint::null(),
            signature: Vec::new(),
            pub_key: note.into_bytes(),
        };
        let output = TxOutput::locked_to(SUBSIDY, to)?;

        let mut tx = Self {
            id: Hash256::ZERO,
            vin: vec![input],
            vout: vec![output],
        };
        tx.id = tx.hash().map_err(PyriteError::Tx)?;
        Ok(tx)
    }

    /// Build and sign a transfer of `amount` to `to`, funded from outputs
    /// owned by `keypair` and selected through the UTXO index.
    ///
    /// Emits a change output back to the sender when the selected inputs
    /// exceed `amount`.
    pub fn new_transfer(
        keypair: &KeyPair,
        to: &str,
        amount: u64,
        utxo: &impl UtxoView,
        txs: &impl TxSource,
    ) -> Result<Self, PyriteError> {
        let pub_key = keypair.public_key().to_bytes();
        let pub_key_hash = hash_pub_key(&pub_key);

        let (accumulated, selected) = utxo.spendable(&pub_key_hash, amount)?;
        if accumulated < amount {
            return Err(TxError::InsufficientFunds {
                have: accumulated,
                need: amount,
            }
            .into());
        }

        let mut vin = Vec::new();
        for (txid, vouts) in &selected {
            for &vout in vouts {
                vin.push(TxInput {
                    previous_output: OutPoint { txid: *txid, vout },
                    signature: Vec::new(),
                    pub_key: pub_key.to_vec(),
                });
            }
        }

        let from = address::encode_pub_key_hash(&pub_key_hash);
        let mut vout = vec![TxOutput::locked_to(amount, to)?];
        if accumulated > amount {
            vout.push(TxOutput::locked_to(accumulated - amount, &from)?);
        }

        let mut tx = Self {
            id: Hash256::ZERO,
            vin,
            vout,
        };
        tx.id = tx.hash().map_err(PyriteError::Tx)?;

        let prev_txs = tx.referenced_transactions(txs)?;
        tx.sign(keypair, &prev_txs)?;
        Ok(tx)
    }

    /// Check whether this is a coinbase (single input with a null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].previous_output.is_null()
    }

    /// Serialize with bincode standard config.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TxError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TxError::Serialization(e.to_string()))
    }

    /// Deserialize from the bincode form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TxError> {
        let (tx, _): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| TxError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// Compute the transaction id: SHA-256 over the serialization with the
    /// id field cleared.
    pub fn hash(&self) -> Result<Hash256, TxError> {
        let mut copy = self.clone();
        copy.id = Hash256::ZERO;
        let bytes = copy.to_bytes()?;
        Ok(Hash256(Sha256::digest(bytes).into()))
    }

    /// Gather the previous transactions referenced by this one.
    pub fn referenced_transactions(
        &self,
        source: &impl TxSource,
    ) -> Result<HashMap<Hash256, Transaction>, StoreError> {
        let mut prev_txs = HashMap::new();
        for input in &self.vin {
            if input.previous_output.is_null() {
                continue;
            }
            let prev = source.transaction(&input.previous_output.txid)?;
            prev_txs.insert(prev.id, prev);
        }
        Ok(prev_txs)
    }

    /// Sign every input with `keypair`. No-op for coinbase transactions.
    ///
    /// `prev_txs` must contain every transaction referenced by the inputs.
    pub fn sign(
        &mut self,
        keypair: &KeyPair,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<(), TxError> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.check_prev_txs(prev_txs)?;

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.vin.len() {
            let digest = prepare_input_digest(&mut trimmed, index, prev_txs)?;
            self.vin[index].signature = keypair.sign(&digest).to_vec();
            trimmed.vin[index].pub_key = Vec::new();
        }
        Ok(())
    }

    /// Verify every input signature. Coinbase transactions always verify.
    ///
    /// Returns `Ok(false)` on any signature, key, or lock mismatch; errors
    /// only when a referenced transaction or output is missing entirely.
    pub fn verify(
        &self,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<bool, TxError> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.check_prev_txs(prev_txs)?;

        let mut trimmed = self.trimmed_copy();
        for (index, input) in self.vin.iter().enumerate() {
            let digest = prepare_input_digest(&mut trimmed, index, prev_txs)?;

            let Ok(pub_key) = PublicKey::from_bytes(&input.pub_key) else {
                return Ok(false);
            };
            if pub_key.verify(&digest, &input.signature).is_err() {
                return Ok(false);
            }
            trimmed.vin[index].pub_key = Vec::new();
        }
        Ok(true)
    }

    /// Ensure every input's previous transaction is present in the map.
    fn check_prev_txs(
        &self,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<(), TxError> {
        for input in &self.vin {
            if !prev_txs.contains_key(&input.previous_output.txid) {
                return Err(TxError::MissingPrevTx(
                    input.previous_output.txid.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// A copy with signatures and pubkeys stripped: the signing skeleton.
    fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TxInput {
                previous_output: input.previous_output.clone(),
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();
        let vout = self
            .vout
            .iter()
            .map(|output| TxOutput {
                value: output.value,
                pub_key_hash: output.pub_key_hash,
            })
            .collect();

        Transaction {
            id: self.id,
            vin,
            vout,
        }
    }

    /// The byte string actually signed: lowercase hex of the serialized
    /// trimmed transaction, followed by a newline.
    fn signing_digest(&self) -> Result<Vec<u8>, TxError> {
        let bytes = self.to_bytes()?;
        let mut rendered = hex::encode(bytes);
        rendered.push('\n');
        Ok(rendered.into_bytes())
    }
}

/// Substitute the referenced output's pubkey hash into the trimmed copy's
/// input and return the resulting signing digest.
fn prepare_input_digest(
    trimmed: &mut Transaction,
    index: usize,
    prev_txs: &HashMap<Hash256, Transaction>,
) -> Result<Vec<u8>, TxError> {
    let outpoint = trimmed.vin[index].previous_output.clone();
    let prev_tx = prev_txs
        .get(&outpoint.txid)
        .ok_or_else(|| TxError::MissingPrevTx(outpoint.txid.to_string()))?;
    let prev_out = prev_tx
        .vout
        .get(outpoint.vout as usize)
        .ok_or(TxError::MissingPrevOutput {
            index,
            vout: outpoint.vout,
        })?;

    trimmed.vin[index].signature = Vec::new();
    trimmed.vin[index].pub_key = prev_out.pub_key_hash.as_bytes().to_vec();
    trimmed.signing_digest()
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   Transaction {}:", self.id)?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", input.previous_output.txid)?;
            writeln!(f, "       Out:       {}", input.previous_output.vout)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", output.pub_key_hash)?;
        }
        Ok(())
    }
}
