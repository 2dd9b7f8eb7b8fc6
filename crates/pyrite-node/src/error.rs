//! Node and wire-protocol error types.
use thiserror::Error;

use pyrite_core::error::{BlockError, PyriteError, StoreError, TxError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame too short: {0} bytes")] ShortFrame(usize),
    #[error("unknown command: {0}")] UnknownCommand(String),
    #[error("payload decode: {0}")] Decode(String),
    #[error("payload encode: {0}")] Encode(String),
    #[error("timed out talking to {0}")] Timeout(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)] Protocol(#[from] ProtocolError),
    #[error(transparent)] Chain(#[from] PyriteError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Tx(#[from] TxError),
    #[error(transparent)] Block(#[from] BlockError),
}
