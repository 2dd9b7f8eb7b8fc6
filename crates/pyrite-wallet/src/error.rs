//! Wallet error types.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("no key for address {0}")] UnknownAddress(String),
    #[error("wallet file corrupt: {0}")] Corrupt(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}
