//! Protocol constants.

/// Block reward paid by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Payload embedded in the genesis coinbase input.
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Number of random bytes hex-encoded into a coinbase note when none is given.
pub const COINBASE_NOTE_LEN: usize = 20;
