//! Node configuration and on-disk layout.
//!
//! A node is identified by a short id string (conventionally its TCP port).
//! The id fixes both the listen endpoint (`localhost:<id>`) and the data
//! file suffixes, so several nodes can share one data directory.

use std::path::PathBuf;

/// Default bootstrap peer every node is introduced through.
pub const DEFAULT_BOOTSTRAP: &str = "localhost:3000";

/// Configuration for one node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node identifier; doubles as the TCP port.
    pub node_id: String,
    /// Root directory for chain databases and wallet files.
    pub data_dir: PathBuf,
    /// Address of the bootstrap peer.
    pub bootstrap_addr: String,
}

impl NodeConfig {
    /// Build a config for `node_id` with the default data directory and
    /// bootstrap peer.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: Self::default_data_dir(),
            bootstrap_addr: DEFAULT_BOOTSTRAP.to_string(),
        }
    }

    /// Platform data directory plus a `pyrite` component.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pyrite")
    }

    /// Path of this node's chain database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockchain_{}.db", self.node_id))
    }

    /// Path of this node's wallet file.
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }

    /// The local listen endpoint derived from the node id.
    pub fn endpoint(&self) -> String {
        format!("localhost:{}", self.node_id)
    }
}
