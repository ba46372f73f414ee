//! The orchestrator: owns the chain, mempool, and transport, and runs the
//! event loop that ties them together.
//!
//! Grounded on `network/server.go`'s `Start()` select loop, which the
//! reference keeps deliberately thin (`fmt.Printf("got msg")`,
//! `createNewBlock` is a stub that only prints). The dispatch table,
//! bootstrap/sync state machine, and broadcast logic here are built out in
//! full instead. Generic over [`Transport`] rather than bound to a
//! concrete `TcpTransport`, so a test can wire two servers together with
//! `LocalTransport` without opening real sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::block::Block;
use crate::chain::{Chain, ChainError};
use crate::codec;
use crate::config::NodeConfig;
use crate::mempool::Mempool;
use crate::message::{self, BlocksMessage, DecodedMessage, GetBlocksMessage, Message, StatusMessage};
use crate::transaction::Transaction;
use crate::transport::{NetAddr, Peer, Rpc, Transport, TransportError};

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Chain-tip view of a single peer: `Unknown` (no entry yet) transitions
/// to `Behind`/`Ahead`/`Even` on the first `STATUS`, and `Behind` starts a
/// sync that holds the state at `Syncing` until the peer is caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerSyncState {
    Behind,
    Ahead,
    Even,
    Syncing,
}

struct PeerSync {
    state: PeerSyncState,
    height: u64,
}

pub struct Server<T: Transport> {
    id: String,
    transport: Arc<T>,
    chain: Mutex<Chain>,
    mempool: Arc<Mempool>,
    private_key: Option<crate::crypto::PrivateKey>,
    block_time: Duration,
    seed_peers: Vec<String>,
    peers: Mutex<HashMap<NetAddr, Arc<dyn Peer>>>,
    peer_sync: Mutex<HashMap<NetAddr, PeerSync>>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
}

impl<T: Transport + 'static> Server<T> {
    pub fn new(config: NodeConfig, transport: Arc<T>, chain: Chain) -> Arc<Server<T>> {
        let (quit_tx, quit_rx) = watch::channel(false);
        Arc::new(Server {
            id: config.id,
            transport,
            chain: Mutex::new(chain),
            mempool: Arc::new(Mempool::new(config.mempool_max_length)),
            private_key: config.private_key,
            block_time: config.block_time,
            seed_peers: config.seed_peers,
            peers: Mutex::new(HashMap::new()),
            peer_sync: Mutex::new(HashMap::new()),
            quit_tx,
            quit_rx,
        })
    }

    fn is_validator(&self) -> bool {
        self.private_key.is_some()
    }

    /// Current chain height, for callers that only need to observe
    /// progress (tests, status endpoints) without reaching into `Chain`.
    pub async fn height(&self) -> u64 {
        self.chain.lock().await.height()
    }

    /// Signals the event loop, validator ticker, and any request-blocks
    /// loops to stop at their next checkpoint, and closes the transport so
    /// its accept loop and per-peer read loops return too.
    pub fn shutdown(&self) {
        self.transport.stop();
        let _ = self.quit_tx.send(true);
    }

    /// Runs until `shutdown()` is called. Spawns the validator ticker (if
    /// configured) and the seed-peer bootstrap, then becomes the single
    /// coordinator multiplexing the peer-connected stream, the inbound-RPC
    /// stream, and the quit signal.
    pub async fn run(self: Arc<Self>) {
        self.transport
            .start()
            .await
            .expect("failed to start transport listener");

        let mut peer_rx = self.transport.take_peer_receiver().await;
        let mut rpc_rx = self.transport.take_rpc_receiver().await;

        if self.is_validator() {
            tokio::spawn(self.clone().validator_loop());
        }
        tokio::spawn(self.clone().bootstrap());

        let mut quit_rx = self.quit_rx.clone();
        info!(id = %self.id, addr = %self.transport.addr(), "server event loop starting");
        loop {
            tokio::select! {
                maybe_peer = peer_rx.recv() => {
                    match maybe_peer {
                        Some(peer) => self.handle_new_peer(peer).await,
                        None => break,
                    }
                }
                maybe_rpc = rpc_rx.recv() => {
                    match maybe_rpc {
                        Some(rpc) => self.handle_rpc(rpc).await,
                        None => break,
                    }
                }
                _ = quit_rx.changed() => {
                    break;
                }
            }
        }
        info!(id = %self.id, "server event loop exiting");
    }

    async fn validator_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.block_time);
        let mut quit_rx = self.quit_rx.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.create_new_block().await {
                        error!(error = %e, "validator tick failed, will retry next tick");
                    }
                }
                _ = quit_rx.changed() => {
                    return;
                }
            }
        }
    }

    async fn create_new_block(&self) -> Result<(), ChainError> {
        let private_key = self
            .private_key
            .as_ref()
            .expect("validator_loop only runs when private_key is set");
        let txs = self.mempool.pending();
        let mut block = {
            let chain = self.chain.lock().await;
            Block::new_with_prev_header(chain.tip_header(), txs, now_nanos())
        };
        block.sign(private_key);
        {
            let mut chain = self.chain.lock().await;
            chain.add_block(block.clone())?;
        }
        self.mempool.clear_pending();
        info!(height = block.header.height, "produced new block");
        self.broadcast(message::encode_block(&block)).await;
        Ok(())
    }

    async fn bootstrap(self: Arc<Self>) {
        for addr in self.seed_peers.clone() {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.transport.connect(&addr).await {
                    warn!(%addr, error = %e, "failed to connect to seed peer");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                this.send_to(&addr, message::encode_get_status()).await;
            });
        }
    }

    async fn handle_new_peer(&self, peer: Arc<dyn Peer>) {
        let addr = peer.addr();
        let mut peers = self.peers.lock().await;
        if peers.contains_key(&addr) {
            debug!(%addr, "peer already known, ignoring duplicate connect");
            return;
        }
        peers.insert(addr.clone(), peer);
        drop(peers);
        info!(%addr, "new peer connected");
    }

    async fn handle_rpc(self: &Arc<Self>, rpc: Rpc) {
        let envelope: Message = match codec::decode(&rpc.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(from = %rpc.from, error = %e, "failed to decode message envelope");
                return;
            }
        };
        let decoded = match message::decode_message(&envelope) {
            Ok(d) => d,
            Err(e) => {
                warn!(from = %rpc.from, error = %e, "failed to decode message payload");
                return;
            }
        };
        match decoded {
            DecodedMessage::Tx(tx) => self.handle_tx(tx).await,
            DecodedMessage::Block(block) => self.handle_block(block).await,
            DecodedMessage::GetStatus(_) => self.handle_get_status(&rpc.from).await,
            DecodedMessage::Status(status) => self.handle_status(&rpc.from, status).await,
            DecodedMessage::GetBlocks(gb) => self.handle_get_blocks(&rpc.from, gb).await,
            DecodedMessage::Blocks(blocks) => self.handle_blocks(blocks).await,
        }
    }

    async fn handle_tx(&self, mut tx: Transaction) {
        let hash = tx.get_hash();
        if self.mempool.contains(&hash) {
            return;
        }
        tx.first_seen = now_nanos() as i64;
        if let Err(e) = tx.verify() {
            debug!(error = %e, "dropping unverifiable transaction");
            return;
        }
        self.broadcast(message::encode_tx(&tx)).await;
        self.mempool.add(tx);
    }

    async fn handle_block(&self, block: Block) {
        let result = {
            let mut chain = self.chain.lock().await;
            chain.add_block(block.clone())
        };
        match result {
            Ok(()) => self.broadcast(message::encode_block(&block)).await,
            Err(ChainError::BlockAlreadyInChain) => {
                debug!("block already in chain, expected under gossip");
            }
            Err(e) => warn!(error = %e, "block application failed"),
        }
    }

    async fn handle_get_status(&self, from: &NetAddr) {
        let (version, height) = {
            let chain = self.chain.lock().await;
            (chain.version(), chain.height())
        };
        let status = StatusMessage {
            id: self.id.clone(),
            version,
            height,
        };
        self.send_to(from, message::encode_status(&status)).await;
    }

    async fn handle_status(self: &Arc<Self>, from: &NetAddr, status: StatusMessage) {
        let local_height = self.chain.lock().await.height();

        let should_start_sync = {
            let mut sync = self.peer_sync.lock().await;
            let entry = sync.entry(from.clone()).or_insert(PeerSync {
                state: PeerSyncState::Even,
                height: 0,
            });
            entry.height = status.height;
            if status.height <= local_height {
                entry.state = if status.height == local_height {
                    PeerSyncState::Even
                } else {
                    PeerSyncState::Ahead
                };
                false
            } else if entry.state == PeerSyncState::Syncing {
                false
            } else {
                entry.state = PeerSyncState::Behind;
                true
            }
        };

        if should_start_sync {
            info!(%from, local_height, peer_height = status.height, "peer is ahead, starting sync");
            {
                let mut sync = self.peer_sync.lock().await;
                if let Some(entry) = sync.get_mut(from) {
                    entry.state = PeerSyncState::Syncing;
                }
            }
            tokio::spawn(self.clone().request_blocks_loop(from.clone()));
        }
    }

    async fn handle_get_blocks(&self, from: &NetAddr, gb: GetBlocksMessage) {
        let blocks = {
            let chain = self.chain.lock().await;
            chain.blocks_in_range(gb.from, gb.to)
        };
        self.send_to(from, message::encode_blocks(blocks)).await;
    }

    async fn handle_blocks(&self, blocks: BlocksMessage) {
        for block in blocks.0 {
            let result = {
                let mut chain = self.chain.lock().await;
                chain.add_block(block)
            };
            match result {
                Ok(()) => {}
                Err(ChainError::BlockAlreadyInChain) => {
                    debug!("synced block already in chain, skipping");
                }
                Err(e) => {
                    warn!(error = %e, "failed to apply synced block, abandoning this batch");
                    break;
                }
            }
        }
    }

    /// Periodic GET_BLOCKS to `peer_addr` until the local height catches up
    /// to the peer's last announced height.
    async fn request_blocks_loop(self: Arc<Self>, peer_addr: NetAddr) {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        let mut quit_rx = self.quit_rx.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = quit_rx.changed() => { return; }
            }

            let local_height = self.chain.lock().await.height();
            let caught_up = {
                let sync = self.peer_sync.lock().await;
                match sync.get(&peer_addr) {
                    Some(entry) => local_height >= entry.height,
                    None => true,
                }
            };
            if caught_up {
                break;
            }

            self.send_to(&peer_addr, message::encode_get_blocks(local_height + 1, 0))
                .await;
        }

        let mut sync = self.peer_sync.lock().await;
        if let Some(entry) = sync.get_mut(&peer_addr) {
            entry.state = PeerSyncState::Even;
        }
    }

    /// Best-effort unicast; a failed send forgets the peer rather than
    /// aborting the caller. Transport I/O errors on a single peer are
    /// logged and that peer is forgotten.
    async fn send_to(&self, addr: &NetAddr, msg: Message) {
        let peer = {
            let peers = self.peers.lock().await;
            peers.get(addr).cloned()
        };
        let Some(peer) = peer else {
            warn!(%addr, "no known peer to send to");
            return;
        };
        if let Err(e) = self.send(&peer, msg).await {
            warn!(%addr, error = %e, "send failed, forgetting peer");
            self.peers.lock().await.remove(addr);
        }
    }

    /// Iterates known peers and sends the encoded envelope to each;
    /// per-peer failures are logged and do not abort the broadcast.
    async fn broadcast(&self, msg: Message) {
        let bytes = codec::encode(&msg);
        let peers: Vec<Arc<dyn Peer>> = self.peers.lock().await.values().cloned().collect();
        for peer in peers {
            if let Err(e) = self.transport.send_message(&peer, bytes.clone()).await {
                warn!(addr = %peer.addr(), error = %e, "broadcast to peer failed");
            }
        }
    }

    async fn send(&self, peer: &Arc<dyn Peer>, msg: Message) -> Result<(), TransportError> {
        self.transport.send_message(peer, codec::encode(&msg)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_keypair, Address};
    use crate::storage::MemStorage;
    use crate::transport::TcpTransport;

    fn test_config(id: &str, port: u16, validator: bool, seed_peers: Vec<String>) -> (NodeConfig, Option<crate::crypto::PublicKey>) {
        let (private_key, public_key) = generate_keypair();
        (
            NodeConfig {
                id: id.to_string(),
                block_time: Duration::from_millis(50),
                private_key: if validator { Some(private_key) } else { None },
                seed_peers,
                mempool_max_length: 1000,
                faucet_address: Address::ZERO,
            },
            if validator { Some(public_key) } else { None },
        )
    }

    fn genesis_chain(validator: Option<crate::crypto::PublicKey>) -> Chain {
        let mut genesis = Block::genesis(vec![], 0);
        let (dummy_key, _) = generate_keypair();
        genesis.sign(&dummy_key);
        if let Some(v) = validator {
            genesis.validator = Some(v);
        }
        Chain::new(genesis, Address::ZERO, Arc::new(MemStorage::new())).unwrap()
    }

    #[tokio::test]
    async fn validator_produces_a_block_on_tick() {
        let (config, validator_pub) = test_config("a", 17801, true, vec![]);
        let chain = genesis_chain(validator_pub);
        let transport = Arc::new(TcpTransport::new("127.0.0.1:17801"));
        let server = Server::new(config, transport, chain);

        let handle = tokio::spawn(server.clone().run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        server.shutdown();
        let _ = handle.await;

        assert!(server.chain.lock().await.height() >= 1);
    }

    #[tokio::test]
    async fn non_validator_never_advances_height_on_its_own() {
        let (config, _) = test_config("b", 17802, false, vec![]);
        let chain = genesis_chain(None);
        let transport = Arc::new(TcpTransport::new("127.0.0.1:17802"));
        let server = Server::new(config, transport, chain);

        let handle = tokio::spawn(server.clone().run());
        tokio::time::sleep(Duration::from_millis(150)).await;
        server.shutdown();
        let _ = handle.await;

        assert_eq!(server.chain.lock().await.height(), 0);
    }
}
