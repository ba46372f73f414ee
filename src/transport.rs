//! Transport and peer abstractions, with two reference implementations
//! sharing a common [`Transport`] contract.
//!
//! Grounded on `network/transport.go` (`Transport` interface: `Consume`,
//! `Connect`, `SendMessage`, `Addr`), `network/local_transport.go`, and
//! `network/tcp_transport.go`. The TCP half replaces the reference's fixed
//! 4096-byte reads with explicit `u32` length-prefix framing; the framing
//! helpers mirror the `MessageFrame` pattern already used for async socket
//! I/O elsewhere in this codebase.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

pub type NetAddr = String;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer not found: {0}")]
    PeerNotFound(String),
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound framed message: the envelope bytes plus who sent them.
pub struct Rpc {
    pub from: NetAddr,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Peer: Send + Sync {
    fn addr(&self) -> NetAddr;
    async fn write(&self, from_addr: &NetAddr, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// The contract every transport exposes: a lifecycle, an address, the
/// ability to dial a peer by address, and two streams — newly connected
/// peers and inbound framed RPCs. `Server` depends on this trait rather
/// than on a concrete transport, so a test can swap in [`LocalTransport`]
/// where a deployment would use [`TcpTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    fn addr(&self) -> NetAddr;

    /// Begins accepting/dialing activity. Idempotent at the type level:
    /// each implementation is only ever started once per instance.
    async fn start(self: &Arc<Self>) -> Result<(), TransportError>;

    /// Stops accepting new connections and unblocks any in-flight reads
    /// with a closed error, so every per-peer read loop returns.
    fn stop(&self);

    async fn connect(self: &Arc<Self>, addr: &str) -> Result<(), TransportError>;

    /// Takes ownership of the inbound-RPC receiver; panics if called twice.
    async fn take_rpc_receiver(&self) -> mpsc::Receiver<Rpc>;

    /// Takes ownership of the peer-connected receiver; panics if called
    /// twice.
    async fn take_peer_receiver(&self) -> mpsc::Receiver<Arc<dyn Peer>>;

    /// Best-effort unicast. A `Peer` already owns the means to reach its
    /// remote end, so every transport can share this implementation.
    async fn send_message(
        &self,
        peer: &Arc<dyn Peer>,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        peer.write(&self.addr(), bytes).await
    }
}

// ---------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------

struct LocalPeer {
    addr: NetAddr,
    sender: mpsc::Sender<Rpc>,
}

#[async_trait]
impl Peer for LocalPeer {
    fn addr(&self) -> NetAddr {
        self.addr.clone()
    }

    async fn write(&self, from_addr: &NetAddr, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sender
            .send(Rpc {
                from: from_addr.clone(),
                payload: bytes,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Process-wide address book so a [`LocalTransport`] can `connect` to
/// another by address, the same way `TcpTransport::connect` dials a
/// string address, instead of requiring a direct reference to the peer.
fn local_registry() -> &'static std::sync::Mutex<HashMap<NetAddr, Weak<LocalTransport>>> {
    static REGISTRY: OnceLock<std::sync::Mutex<HashMap<NetAddr, Weak<LocalTransport>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| std::sync::Mutex::new(HashMap::new()))
}

/// Channels keyed by address; `connect` registers a peer on both ends and
/// emits it on each side's peer-connected stream, `send_message` writes
/// directly into the target peer's inbound channel.
pub struct LocalTransport {
    addr: NetAddr,
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: Mutex<Option<mpsc::Receiver<Rpc>>>,
    peer_tx: mpsc::Sender<Arc<dyn Peer>>,
    peer_rx: Mutex<Option<mpsc::Receiver<Arc<dyn Peer>>>>,
    peers: Mutex<HashMap<NetAddr, Arc<dyn Peer>>>,
}

impl LocalTransport {
    /// Builds a transport and registers it in the process-wide address
    /// registry so other `LocalTransport`s can `connect` to it by address.
    pub fn new(addr: impl Into<NetAddr>) -> Arc<LocalTransport> {
        let addr = addr.into();
        let (rpc_tx, rpc_rx) = mpsc::channel(1024);
        let (peer_tx, peer_rx) = mpsc::channel(64);
        let transport = Arc::new(LocalTransport {
            addr: addr.clone(),
            rpc_tx,
            rpc_rx: Mutex::new(Some(rpc_rx)),
            peer_tx,
            peer_rx: Mutex::new(Some(peer_rx)),
            peers: Mutex::new(HashMap::new()),
        });
        local_registry()
            .lock()
            .unwrap()
            .insert(addr, Arc::downgrade(&transport));
        transport
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn addr(&self) -> NetAddr {
        self.addr.clone()
    }

    async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop(&self) {
        local_registry().lock().unwrap().remove(&self.addr);
    }

    /// Looks `addr` up in the process-wide registry and wires both ends:
    /// `self` learns of the target, and the target learns of `self`, the
    /// same way accepting a TCP connection hands the acceptor a `Peer` for
    /// the dialer without a separate call.
    async fn connect(self: &Arc<Self>, addr: &str) -> Result<(), TransportError> {
        let target = local_registry()
            .lock()
            .unwrap()
            .get(addr)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransportError::PeerNotFound(addr.to_string()))?;

        let peer_of_target: Arc<dyn Peer> = Arc::new(LocalPeer {
            addr: target.addr.clone(),
            sender: target.rpc_tx.clone(),
        });
        self.peers
            .lock()
            .await
            .insert(target.addr.clone(), peer_of_target.clone());
        self.peer_tx
            .send(peer_of_target)
            .await
            .map_err(|_| TransportError::Closed)?;

        let peer_of_self: Arc<dyn Peer> = Arc::new(LocalPeer {
            addr: self.addr.clone(),
            sender: self.rpc_tx.clone(),
        });
        target
            .peers
            .lock()
            .await
            .insert(self.addr.clone(), peer_of_self.clone());
        target
            .peer_tx
            .send(peer_of_self)
            .await
            .map_err(|_| TransportError::Closed)?;

        Ok(())
    }

    async fn take_rpc_receiver(&self) -> mpsc::Receiver<Rpc> {
        self.rpc_rx
            .lock()
            .await
            .take()
            .expect("rpc receiver already taken")
    }

    async fn take_peer_receiver(&self) -> mpsc::Receiver<Arc<dyn Peer>> {
        self.peer_rx
            .lock()
            .await
            .take()
            .expect("peer receiver already taken")
    }
}

// ---------------------------------------------------------------------
// TCP transport
// ---------------------------------------------------------------------

struct TcpPeer {
    addr: NetAddr,
    stream: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

#[async_trait]
impl Peer for TcpPeer {
    fn addr(&self) -> NetAddr {
        self.addr.clone()
    }

    async fn write(&self, _from_addr: &NetAddr, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut stream = self.stream.lock().await;
        let len = bytes.len() as u32;
        stream.write_all(&len.to_le_bytes()).await?;
        stream.write_all(&bytes).await?;
        Ok(())
    }
}

async fn read_frame_half(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    read_half.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    read_half.read_exact(&mut payload).await?;
    Ok(payload)
}

pub struct TcpTransport {
    addr: String,
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: Mutex<Option<mpsc::Receiver<Rpc>>>,
    peer_tx: mpsc::Sender<Arc<dyn Peer>>,
    peer_rx: Mutex<Option<mpsc::Receiver<Arc<dyn Peer>>>>,
    quit_tx: watch::Sender<bool>,
    quit_rx: watch::Receiver<bool>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        let (rpc_tx, rpc_rx) = mpsc::channel(1024);
        let (peer_tx, peer_rx) = mpsc::channel(64);
        let (quit_tx, quit_rx) = watch::channel(false);
        TcpTransport {
            addr: addr.into(),
            rpc_tx,
            rpc_rx: Mutex::new(Some(rpc_rx)),
            peer_tx,
            peer_rx: Mutex::new(Some(peer_rx)),
            quit_tx,
            quit_rx,
        }
    }

    async fn spawn_reader(self: Arc<Self>, stream: TcpStream, remote: String) {
        let (mut read_half, write_half) = stream.into_split();
        let peer: Arc<dyn Peer> = Arc::new(TcpPeer {
            addr: remote.clone(),
            stream: Mutex::new(write_half),
        });
        if self.peer_tx.send(peer).await.is_err() {
            return;
        }
        let rpc_tx = self.rpc_tx.clone();
        let mut quit_rx = self.quit_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = read_frame_half(&mut read_half) => {
                        match result {
                            Ok(payload) => {
                                if rpc_tx
                                    .send(Rpc { from: remote.clone(), payload })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Err(_) => {
                                debug!(%remote, "tcp peer read loop ending");
                                return;
                            }
                        }
                    }
                    _ = quit_rx.changed() => {
                        debug!(%remote, "tcp peer read loop cancelled by shutdown");
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn addr(&self) -> NetAddr {
        self.addr.clone()
    }

    async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!(addr = %self.addr, "tcp transport listening");
        let this = self.clone();
        let mut quit_rx = self.quit_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote)) => {
                                this.clone().spawn_reader(stream, remote.to_string()).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "tcp accept failed");
                            }
                        }
                    }
                    _ = quit_rx.changed() => {
                        debug!(addr = %this.addr, "tcp accept loop shutting down");
                        return;
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        let _ = self.quit_tx.send(true);
    }

    async fn connect(self: &Arc<Self>, addr: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr).await?;
        self.clone().spawn_reader(stream, addr.to_string()).await;
        Ok(())
    }

    async fn take_rpc_receiver(&self) -> mpsc::Receiver<Rpc> {
        self.rpc_rx
            .lock()
            .await
            .take()
            .expect("rpc receiver already taken")
    }

    async fn take_peer_receiver(&self) -> mpsc::Receiver<Arc<dyn Peer>> {
        self.peer_rx
            .lock()
            .await
            .take()
            .expect("peer receiver already taken")
    }
}
