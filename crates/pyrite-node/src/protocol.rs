//! Wire framing and message payloads.
//!
//! Every message is a 12-byte ASCII command, zero-padded on the right,
//! followed by the bincode encoding of a command-specific payload struct.
//! Each TCP connection carries exactly one message and is closed by the
//! sender once the payload is written.

use serde::{Deserialize, Serialize};

use pyrite_core::types::Hash256;

use crate::error::ProtocolError;

/// Length of the command prefix.
pub const CMD_LEN: usize = 12;

/// Protocol version advertised in `version` messages.
pub const NODE_VERSION: u64 = 1;

/// The seven gossip commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Version,
    Addr,
    Inv,
    GetBlocks,
    GetData,
    Block,
    Tx,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetBlocks => "get_blocks",
            Command::GetData => "get_data",
            Command::Block => "block",
            Command::Tx => "tx",
        }
    }

    /// Render as the zero-padded 12-byte prefix.
    pub fn to_bytes(self) -> [u8; CMD_LEN] {
        let mut out = [0u8; CMD_LEN];
        let name = self.as_str().as_bytes();
        out[..name.len()].copy_from_slice(name);
        out
    }

    /// Parse a 12-byte prefix back into a command.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let trimmed: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
        let name = String::from_utf8(trimmed)
            .map_err(|_| ProtocolError::UnknownCommand("<non-ascii>".into()))?;
        match name.as_str() {
            "version" => Ok(Command::Version),
            "addr" => Ok(Command::Addr),
            "inv" => Ok(Command::Inv),
            "get_blocks" => Ok(Command::GetBlocks),
            "get_data" => Ok(Command::GetData),
            "block" => Ok(Command::Block),
            "tx" => Ok(Command::Tx),
            _ => Err(ProtocolError::UnknownCommand(name)),
        }
    }
}

/// What an `inv` or `get_data` message refers to.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum InvKind {
    Block,
    Tx,
}

impl InvKind {
    /// Human-readable kind name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvKind::Block => "block",
            InvKind::Tx => "tx",
        }
    }
}

/// `version`: height handshake opening every peer relationship.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct VersionMsg {
    pub version: u64,
    pub best_height: u64,
    pub from_addr: String,
}

/// `addr`: peer addresses worth knowing about.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AddrMsg {
    pub values: Vec<String>,
}

/// `get_blocks`: request the full hash inventory.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetBlocksMsg {
    pub from_addr: String,
}

/// `inv`: advertise block hashes or transaction ids.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct InvMsg {
    pub from_addr: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

/// `get_data`: fetch one block or transaction by id.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetDataMsg {
    pub from_addr: String,
    pub kind: InvKind,
    pub id: Hash256,
}

/// `block`: a serialized block.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockMsg {
    pub from_addr: String,
    pub block: Vec<u8>,
}

/// `tx`: a serialized transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxMsg {
    pub from_addr: String,
    pub tx: Vec<u8>,
}

/// Assemble a complete wire frame: command prefix plus encoded payload.
pub fn frame(cmd: Command, payload: &impl bincode::Encode) -> Result<Vec<u8>, ProtocolError> {
    let encoded = bincode::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(CMD_LEN + encoded.len());
    out.extend_from_slice(&cmd.to_bytes());
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// Split a received frame into its command and payload bytes.
pub fn split_frame(raw: &[u8]) -> Result<(Command, &[u8]), ProtocolError> {
    if raw.len() < CMD_LEN {
        return Err(ProtocolError::ShortFrame(raw.len()));
    }
    let cmd = Command::parse(&raw[..CMD_LEN])?;
    Ok((cmd, &raw[CMD_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COMMANDS: [Command; 7] = [
        Command::Version,
        Command::Addr,
        Command::Inv,
        Command::GetBlocks,
        Command::GetData,
        Command::Block,
        Command::Tx,
    ];

    #[test]
    fn command_names_fit_the_prefix() {
        for cmd in ALL_COMMANDS {
            assert!(cmd.as_str().len() <= CMD_LEN);
        }
    }

    #[test]
    fn command_prefix_round_trips() {
        for cmd in ALL_COMMANDS {
            let bytes = cmd.to_bytes();
            assert_eq!(bytes.len(), CMD_LEN);
            assert_eq!(Command::parse(&bytes).unwrap(), cmd);
        }
    }

    #[test]
    fn prefix_is_zero_padded_ascii() {
        let bytes = Command::Tx.to_bytes();
        assert_eq!(&bytes[..2], b"tx");
        assert!(bytes[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut bytes = [0u8; CMD_LEN];
        bytes[..5].copy_from_slice(b"bogus");
        assert!(matches!(
            Command::parse(&bytes),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn frame_and_split_round_trip() {
        let msg = VersionMsg {
            version: NODE_VERSION,
            best_height: 7,
            from_addr: "localhost:3001".into(),
        };
        let raw = frame(Command::Version, &msg).unwrap();
        let (cmd, payload) = split_frame(&raw).unwrap();
        assert_eq!(cmd, Command::Version);

        let (decoded, _): (VersionMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn short_frame_rejected() {
        assert!(matches!(
            split_frame(b"tx"),
            Err(ProtocolError::ShortFrame(2))
        ));
    }

    #[test]
    fn inv_round_trip() {
        let msg = InvMsg {
            from_addr: "localhost:3000".into(),
            kind: InvKind::Block,
            items: vec![Hash256([0x11; 32]), Hash256([0x22; 32])],
        };
        let raw = frame(Command::Inv, &msg).unwrap();
        let (cmd, payload) = split_frame(&raw).unwrap();
        assert_eq!(cmd, Command::Inv);
        let (decoded, _): (InvMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn get_data_round_trip() {
        let msg = GetDataMsg {
            from_addr: "localhost:3002".into(),
            kind: InvKind::Tx,
            id: Hash256([0xAB; 32]),
        };
        let raw = frame(Command::GetData, &msg).unwrap();
        let (_, payload) = split_frame(&raw).unwrap();
        let (decoded, _): (GetDataMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let raw = frame(Command::Addr, &AddrMsg { values: vec![] }).unwrap();
        let (_, payload) = split_frame(&raw).unwrap();
        let result: Result<(VersionMsg, usize), _> =
            bincode::decode_from_slice(payload, bincode::config::standard());
        assert!(result.is_err());
    }
}
