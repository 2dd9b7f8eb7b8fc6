//! Error types for the Pyrite protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("previous transaction not found: {0}")] MissingPrevTx(String),
    #[error("transaction verification failed: {0}")] Invalid(String),
    #[error("coinbase shape violation: {0}")] CoinbaseShape(String),
    #[error("malformed signature on input {index}")] MalformedSignature { index: usize },
    #[error("malformed public key on input {index}")] MalformedPubKey { index: usize },
    #[error("input {index} references missing output {vout}")] MissingPrevOutput { index: usize, vout: u64 },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid proof of work")] InvalidPoW,
    #[error("block has no transactions")] NoTransactions,
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("base58 decode: {0}")] Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("invalid signature bytes")] InvalidSignature,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("chain database already exists: {0}")] AlreadyExists(String),
    #[error("chain database not found: {0}")] NotFound(String),
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("transaction not found: {0}")] TxNotFound(String),
    #[error("database: {0}")] Db(String),
    #[error("codec: {0}")] Codec(String),
}

#[derive(Error, Debug)]
pub enum PyriteError {
    #[error(transparent)] Tx(#[from] TxError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
