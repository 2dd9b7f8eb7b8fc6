//! # pyrite-wallet
//! A persistent collection of keypairs keyed by their address.

pub mod error;
pub mod wallet;

pub use error::WalletError;
pub use wallet::Wallet;
