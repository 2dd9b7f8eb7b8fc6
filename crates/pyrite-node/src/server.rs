//! The gossip node: TCP listener, handlers, mempool, and mining loop.
//!
//! Each accepted connection is handled by its own task, which reads the
//! whole message to end-of-stream before decoding. The peer list, mempool,
//! and block fetch queue live behind a single mutex held only for
//! individual state steps, never across socket I/O. Block and UTXO state
//! synchronization is delegated to the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pyrite_chain::{Blockchain, UtxoIndex};
use pyrite_core::block::Block;
use pyrite_core::error::{BlockError, TxError};
use pyrite_core::transaction::Transaction;
use pyrite_core::types::Hash256;

use crate::config::NodeConfig;
use crate::error::{NodeError, ProtocolError};
use crate::protocol::{
    AddrMsg, BlockMsg, CMD_LEN, Command, GetBlocksMsg, GetDataMsg, InvKind, InvMsg,
    NODE_VERSION, TxMsg, VersionMsg, frame, split_frame,
};

/// Deadline applied to every connect, read, and write.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared mutable node state: peers, fetch queue, mempool.
struct NodeState {
    /// Known peers; the first entry is the bootstrap peer.
    peers: Vec<String>,
    /// Block hashes advertised but not yet fetched, drained one at a time.
    blocks_in_transit: Vec<Hash256>,
    /// Pending transactions keyed by hex txid.
    mempool: HashMap<String, Transaction>,
}

/// A running gossip node.
pub struct Server {
    endpoint: String,
    bootstrap: String,
    miner_address: Option<String>,
    chain: Blockchain,
    state: Mutex<NodeState>,
}

impl Server {
    /// Wire up a node over an opened chain store.
    ///
    /// `miner_address` enables the mining loop when set.
    pub fn new(
        config: &NodeConfig,
        chain: Blockchain,
        miner_address: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint: config.endpoint(),
            bootstrap: config.bootstrap_addr.clone(),
            miner_address,
            chain,
            state: Mutex::new(NodeState {
                peers: vec![config.bootstrap_addr.clone()],
                blocks_in_transit: Vec::new(),
                mempool: HashMap::new(),
            }),
        })
    }

    /// The chain store this node serves.
    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Number of pending transactions in the mempool.
    pub fn mempool_size(&self) -> usize {
        self.state.lock().mempool.len()
    }

    /// Whether the mempool currently holds the given transaction.
    pub fn mempool_contains(&self, id: &Hash256) -> bool {
        self.state.lock().mempool.contains_key(&id.to_hex())
    }

    /// Current peer list snapshot.
    pub fn peers(&self) -> Vec<String> {
        self.state.lock().peers.clone()
    }

    /// Listen for connections forever, introducing ourselves to the
    /// bootstrap peer first when we are not it.
    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(&self.endpoint)
            .await
            .map_err(ProtocolError::Io)?;
        info!(endpoint = %self.endpoint, miner = self.miner_address.is_some(), "node listening");

        if self.endpoint != self.bootstrap {
            self.send_version(&self.bootstrap).await?;
        }

        loop {
            let (stream, peer) = listener.accept().await.map_err(ProtocolError::Io)?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_conn(stream).await {
                    warn!(%peer, error = %e, "connection dropped");
                }
            });
        }
    }

    async fn handle_conn(&self, mut stream: TcpStream) -> Result<(), NodeError> {
        let mut raw = Vec::new();
        timeout(IO_TIMEOUT, stream.read_to_end(&mut raw))
            .await
            .map_err(|_| ProtocolError::Timeout("read".into()))?
            .map_err(ProtocolError::Io)?;

        let (cmd, payload) = split_frame(&raw)?;
        debug!(cmd = cmd.as_str(), bytes = raw.len() - CMD_LEN, "received command");

        match cmd {
            Command::Version => self.handle_version(payload).await,
            Command::Addr => self.handle_addr(payload).await,
            Command::Inv => self.handle_inv(payload).await,
            Command::GetBlocks => self.handle_get_blocks(payload).await,
            Command::GetData => self.handle_get_data(payload).await,
            Command::Block => self.handle_block(payload).await,
            Command::Tx => self.handle_tx(payload).await,
        }
    }

    // --- Handlers ---

    async fn handle_version(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (VersionMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let local_height = self.chain.best_height()?;
        if msg.best_height > local_height {
            self.send_get_blocks(&msg.from_addr).await?;
        } else if msg.best_height < local_height {
            self.send_version(&msg.from_addr).await?;
        }

        let mut state = self.state.lock();
        if !state.peers.contains(&msg.from_addr) {
            state.peers.push(msg.from_addr.clone());
            info!(peer = %msg.from_addr, peers = state.peers.len(), "learned new peer");
        }
        Ok(())
    }

    async fn handle_addr(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (AddrMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let peers = {
            let mut state = self.state.lock();
            state.peers.extend(msg.values);
            info!(peers = state.peers.len(), "peer list extended");
            state.peers.clone()
        };

        for peer in peers {
            self.send_get_blocks(&peer).await?;
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (GetBlocksMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let hashes = self.chain.block_hashes()?;
        self.send_inv(&msg.from_addr, InvKind::Block, hashes).await
    }

    async fn handle_inv(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (InvMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        debug!(kind = msg.kind.as_str(), items = msg.items.len(), "received inventory");

        let Some(first) = msg.items.first().copied() else {
            return Ok(());
        };

        match msg.kind {
            InvKind::Block => {
                {
                    let mut state = self.state.lock();
                    state.blocks_in_transit = msg.items.clone();
                    state.blocks_in_transit.retain(|hash| *hash != first);
                }
                self.send_get_data(&msg.from_addr, InvKind::Block, first)
                    .await
            }
            InvKind::Tx => {
                let known = self
                    .state
                    .lock()
                    .mempool
                    .contains_key(&first.to_hex());
                if !known {
                    self.send_get_data(&msg.from_addr, InvKind::Tx, first).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_get_data(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (GetDataMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        match msg.kind {
            InvKind::Block => {
                let block = self.chain.block_by_hash(&msg.id)?;
                self.send_block(&msg.from_addr, &block).await
            }
            InvKind::Tx => {
                let tx = self.state.lock().mempool.get(&msg.id.to_hex()).cloned();
                match tx {
                    Some(tx) => self.send_tx(&msg.from_addr, &tx).await,
                    None => {
                        warn!(id = %msg.id, "requested transaction not in mempool");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn handle_block(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (BlockMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let block = Block::from_bytes(&msg.block)?;
        if !block.validate_pow()? {
            warn!(hash = %block.hash, "rejecting block with invalid proof of work");
            return Err(BlockError::InvalidPoW.into());
        }

        self.chain.submit(&block)?;
        info!(hash = %block.hash, height = block.height, "added block");

        let next = {
            let mut state = self.state.lock();
            if state.blocks_in_transit.is_empty() {
                None
            } else {
                Some(state.blocks_in_transit.remove(0))
            }
        };

        match next {
            Some(hash) => {
                self.send_get_data(&msg.from_addr, InvKind::Block, hash)
                    .await
            }
            None => {
                UtxoIndex::new(&self.chain).rebuild()?;
                info!("utxo index rebuilt");
                Ok(())
            }
        }
    }

    async fn handle_tx(&self, payload: &[u8]) -> Result<(), NodeError> {
        let (msg, _): (TxMsg, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let tx = Transaction::from_bytes(&msg.tx)?;
        // Only the miner may introduce coinbases, and it does so itself
        // when assembling a block. A coinbase-shaped transaction arriving
        // over the wire skips signature verification and would mint value.
        if tx.is_coinbase() {
            warn!(id = %tx.id, from = %msg.from_addr, "rejecting coinbase-shaped transaction from the network");
            return Err(TxError::CoinbaseShape(tx.id.to_hex()).into());
        }

        let txid = tx.id;
        let mempool_len = {
            let mut state = self.state.lock();
            state.mempool.insert(txid.to_hex(), tx);
            info!(id = %txid, mempool = state.mempool.len(), "transaction added to mempool");
            state.mempool.len()
        };

        if self.endpoint == self.bootstrap {
            // The bootstrap node relays the announcement to everyone else.
            let peers = self.peers();
            for peer in peers {
                if peer != self.endpoint && peer != msg.from_addr {
                    self.send_inv(&peer, InvKind::Tx, vec![txid]).await?;
                }
            }
            return Ok(());
        }

        if let Some(miner_address) = self.miner_address.clone() {
            if mempool_len >= 2 {
                self.mine_mempool(&miner_address).await?;
            }
        }
        Ok(())
    }

    /// Drain the mempool into mined blocks: verify candidates, put the
    /// miner's coinbase first, mine, rebuild the UTXO index, evict the
    /// mined transactions, and announce the block. Repeats while
    /// transactions remain.
    async fn mine_mempool(&self, miner_address: &str) -> Result<(), NodeError> {
        loop {
            let candidates: Vec<Transaction> = {
                self.state.lock().mempool.values().cloned().collect()
            };

            let mut txs = Vec::new();
            for tx in candidates {
                if self.chain.verify_tx(&tx)? {
                    txs.push(tx);
                }
            }
            if txs.is_empty() {
                info!("all mempool transactions are invalid, waiting for new ones");
                return Ok(());
            }

            let coinbase = Transaction::new_coinbase(miner_address, "")?;
            txs.insert(0, coinbase);

            let block = self.chain.mine(txs.clone())?;
            UtxoIndex::new(&self.chain).rebuild()?;
            info!(hash = %block.hash, height = block.height, "new block mined");

            let remaining = {
                let mut state = self.state.lock();
                for tx in &txs {
                    state.mempool.remove(&tx.id.to_hex());
                }
                state.mempool.len()
            };

            let peers = self.peers();
            for peer in peers {
                if peer != self.endpoint {
                    self.send_inv(&peer, InvKind::Block, vec![block.hash]).await?;
                }
            }

            if remaining == 0 {
                return Ok(());
            }
        }
    }

    // --- Outbound messages ---

    async fn send_version(&self, addr: &str) -> Result<(), NodeError> {
        let msg = VersionMsg {
            version: NODE_VERSION,
            best_height: self.chain.best_height()?,
            from_addr: self.endpoint.clone(),
        };
        self.send(addr, frame(Command::Version, &msg)?).await;
        Ok(())
    }

    async fn send_get_blocks(&self, addr: &str) -> Result<(), NodeError> {
        let msg = GetBlocksMsg {
            from_addr: self.endpoint.clone(),
        };
        self.send(addr, frame(Command::GetBlocks, &msg)?).await;
        Ok(())
    }

    async fn send_inv(
        &self,
        addr: &str,
        kind: InvKind,
        items: Vec<Hash256>,
    ) -> Result<(), NodeError> {
        let msg = InvMsg {
            from_addr: self.endpoint.clone(),
            kind,
            items,
        };
        self.send(addr, frame(Command::Inv, &msg)?).await;
        Ok(())
    }

    async fn send_get_data(
        &self,
        addr: &str,
        kind: InvKind,
        id: Hash256,
    ) -> Result<(), NodeError> {
        let msg = GetDataMsg {
            from_addr: self.endpoint.clone(),
            kind,
            id,
        };
        self.send(addr, frame(Command::GetData, &msg)?).await;
        Ok(())
    }

    async fn send_block(&self, addr: &str, block: &Block) -> Result<(), NodeError> {
        let msg = BlockMsg {
            from_addr: self.endpoint.clone(),
            block: block.to_bytes()?,
        };
        self.send(addr, frame(Command::Block, &msg)?).await;
        Ok(())
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<(), NodeError> {
        let msg = TxMsg {
            from_addr: self.endpoint.clone(),
            tx: tx.to_bytes()?,
        };
        self.send(addr, frame(Command::Tx, &msg)?).await;
        Ok(())
    }

    /// Dial a peer and write one frame. A failed dial drops the peer from
    /// the list; a failed write is only logged.
    async fn send(&self, addr: &str, raw: Vec<u8>) {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr)).await;
        let mut stream = match stream {
            Ok(Ok(stream)) => stream,
            _ => {
                warn!(peer = addr, "peer unavailable, dropping from peer list");
                self.state.lock().peers.retain(|p| p != addr);
                return;
            }
        };

        let write = timeout(IO_TIMEOUT, async {
            stream.write_all(&raw).await?;
            stream.shutdown().await
        })
        .await;
        match write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(peer = addr, error = %e, "write failed"),
            Err(_) => warn!(peer = addr, "write timed out"),
        }
    }
}

/// Send a signed transaction to the configured bootstrap peer.
///
/// Used by the transfer path when not mining locally: the bootstrap node
/// relays the announcement and a miner eventually picks the transaction up.
pub async fn submit_transaction(
    config: &NodeConfig,
    tx: &Transaction,
) -> Result<(), NodeError> {
    let msg = TxMsg {
        from_addr: config.endpoint(),
        tx: tx.to_bytes()?,
    };
    let raw = frame(Command::Tx, &msg)?;

    let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(&config.bootstrap_addr))
        .await
        .map_err(|_| ProtocolError::Timeout(config.bootstrap_addr.clone()))?
        .map_err(ProtocolError::Io)?;
    timeout(IO_TIMEOUT, async {
        stream.write_all(&raw).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| ProtocolError::Timeout(config.bootstrap_addr.clone()))?
    .map_err(ProtocolError::Io)?;

    Ok(())
}
