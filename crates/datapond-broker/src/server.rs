// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker core: TCP listener, peer registry, and the server-role store.
//!
//! One reader thread per connection decodes frames and forwards them into a
//! single dispatch channel; one dispatch thread delivers them, serially, to
//! the store's request handler. Replies and notifies go back through the
//! per-peer stream handles. Peer order on one connection is preserved end to
//! end, which carries the store's per-connection FIFO notify guarantee.

use crate::config::{BrokerConfig, ConfigError};
use crossbeam::channel::{unbounded, Receiver, Sender};
use datapond::transport::{read_frame, write_frame};
use datapond::{
    ClientRef, DataPool, Error as StoreError, MessageKind, PackageHandler, PackageHeader, Role,
    Transport,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Peer {
    identity: String,
    stream: TcpStream,
}

struct BrokerShared {
    config: BrokerConfig,
    peers: Mutex<HashMap<u64, Peer>>,
    next_peer: AtomicU64,
    shutdown: AtomicBool,
}

struct Envelope {
    from: ClientRef,
    header: PackageHeader,
    body: Vec<u8>,
}

/// Server-side [`Transport`]: resolves and writes to connected TCP peers.
struct BrokerTransport {
    shared: Arc<BrokerShared>,
    handlers: Mutex<HashMap<MessageKind, Arc<dyn PackageHandler>>>,
    sequence: AtomicU32,
}

impl Transport for BrokerTransport {
    fn role(&self) -> Role {
        Role::Server
    }

    fn local_identity(&self) -> String {
        self.shared.config.broker_name.clone()
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn send(
        &self,
        target: &ClientRef,
        kind: MessageKind,
        sequence: u32,
        body: &[u8],
    ) -> datapond::Result<()> {
        // Clone the stream handle out of the registry lock so a slow peer
        // socket never stalls other lookups.
        let mut stream = {
            let peers = self.shared.peers.lock();
            let peer = peers
                .get(&target.id())
                .ok_or(StoreError::TransportUnavailable)?;
            peer.stream.try_clone().map_err(StoreError::Io)?
        };
        write_frame(&mut stream, kind, sequence, body)
    }

    fn resolve(&self, identity: Option<&str>) -> datapond::Result<ClientRef> {
        match identity {
            None => Ok(ClientRef::new(u64::MAX, &self.shared.config.broker_name)),
            Some(identity) => {
                let peers = self.shared.peers.lock();
                peers
                    .iter()
                    .find(|(_, peer)| peer.identity == identity)
                    .map(|(id, peer)| ClientRef::new(*id, &peer.identity))
                    .ok_or(StoreError::TransportUnavailable)
            }
        }
    }

    fn register_handler(&self, kind: MessageKind, handler: Arc<dyn PackageHandler>) {
        self.handlers.lock().insert(kind, handler);
    }
}

/// The broker: listener, dispatch loop, and the authoritative store.
pub struct Broker {
    shared: Arc<BrokerShared>,
    pool: DataPool,
    local_addr: SocketAddr,
    accept_handle: Option<JoinHandle<()>>,
}

impl Broker {
    /// Bind, start the dispatch and accept threads, and bring up the
    /// server-role store.
    pub fn start(config: BrokerConfig) -> Result<Self, BrokerError> {
        config.validate()?;

        let listener = TcpListener::bind((config.bind_address, config.port))
            .map_err(|e| BrokerError::Bind(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| BrokerError::Bind(e.to_string()))?;

        let shared = Arc::new(BrokerShared {
            config,
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });
        let transport = Arc::new(BrokerTransport {
            shared: Arc::clone(&shared),
            handlers: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(1),
        });
        let pool = DataPool::new(Arc::clone(&transport) as Arc<dyn Transport>)
            .map_err(|e| BrokerError::Store(e.to_string()))?;

        let (tx, rx) = unbounded::<Envelope>();

        let dispatch_transport = Arc::clone(&transport);
        thread::Builder::new()
            .name("broker-dispatch".into())
            .spawn(move || dispatch_loop(rx, dispatch_transport))
            .map_err(|e| BrokerError::Io(e.to_string()))?;

        let accept_shared = Arc::clone(&shared);
        let accept_handle = thread::Builder::new()
            .name("broker-accept".into())
            .spawn(move || accept_loop(listener, accept_shared, tx))
            .map_err(|e| BrokerError::Io(e.to_string()))?;

        info!("broker listening on {}", local_addr);
        Ok(Self {
            shared,
            pool,
            local_addr,
            accept_handle: Some(accept_handle),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.shared.peers.lock().len()
    }

    /// Broker-side store, for in-process access to the hosted ponds.
    pub fn pool(&self) -> &DataPool {
        &self.pool
    }

    /// Block until the accept loop exits.
    pub fn wait(&mut self) {
        if let Some(handle) = self.accept_handle.take() {
            handle.join().ok();
        }
    }

    /// Stop accepting, drop every peer, and let the worker threads drain.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("broker shutting down");
        // Unblock the accept loop with a throwaway connection.
        TcpStream::connect(self.local_addr).ok();

        let mut peers = self.shared.peers.lock();
        for peer in peers.values() {
            peer.stream.shutdown(Shutdown::Both).ok();
        }
        peers.clear();
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown();
        self.wait();
    }
}

fn dispatch_loop(rx: Receiver<Envelope>, transport: Arc<BrokerTransport>) {
    while let Ok(envelope) = rx.recv() {
        let handler = transport.handlers.lock().get(&envelope.header.kind).cloned();
        match handler {
            Some(handler) => handler.on_package(&envelope.from, &envelope.header, &envelope.body),
            None => debug!("no handler for {:?}", envelope.header.kind),
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<BrokerShared>, tx: Sender<Envelope>) {
    for stream in listener.incoming() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let peer_addr = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".into());
                debug!("new connection from {}", peer_addr);

                let shared = Arc::clone(&shared);
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name("broker-conn".into())
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, &shared, tx) {
                            warn!("connection {} ended with error: {}", peer_addr, e);
                        }
                    });
                if let Err(e) = spawned {
                    warn!("failed to spawn connection thread: {}", e);
                }
            }
            Err(e) => warn!("accept error: {}", e),
        }
    }
    debug!("accept loop stopped");
}

fn serve_connection(
    mut stream: TcpStream,
    shared: &Arc<BrokerShared>,
    tx: Sender<Envelope>,
) -> datapond::Result<()> {
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();

    // First frame must be the identity announcement.
    let identity = match read_frame(&mut stream, shared.config.max_message_size)? {
        Some((header, body)) if header.kind == MessageKind::Hello => String::from_utf8(body)
            .map_err(|_| StoreError::Protocol("client identity is not UTF-8".into()))?,
        Some((header, _)) => {
            return Err(StoreError::Protocol(format!(
                "expected Hello, got {:?}",
                header.kind
            )))
        }
        None => return Ok(()),
    };
    if identity.is_empty() {
        return Err(StoreError::Protocol("client identity is empty".into()));
    }
    stream.set_read_timeout(None).ok();

    let peer_id = {
        let mut peers = shared.peers.lock();
        if peers.len() >= shared.config.max_clients {
            warn!("rejecting {}: client limit reached", identity);
            return Ok(());
        }
        if peers.values().any(|peer| peer.identity == identity) {
            warn!("rejecting duplicate identity {}", identity);
            return Ok(());
        }
        let id = shared.next_peer.fetch_add(1, Ordering::Relaxed);
        peers.insert(
            id,
            Peer {
                identity: identity.clone(),
                stream: stream.try_clone()?,
            },
        );
        id
    };
    info!("registered client {} (peer {})", identity, peer_id);

    // Answer with our own identity so the client can name us.
    write_frame(
        &mut stream,
        MessageKind::Hello,
        0,
        shared.config.broker_name.as_bytes(),
    )?;

    let sender = ClientRef::new(peer_id, &identity);
    let result = loop {
        match read_frame(&mut stream, shared.config.max_message_size) {
            Ok(Some((header, body))) => {
                if tx
                    .send(Envelope {
                        from: sender.clone(),
                        header,
                        body,
                    })
                    .is_err()
                {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => {
                if shared.shutdown.load(Ordering::SeqCst) {
                    break Ok(());
                }
                break Err(e);
            }
        }
    };

    shared.peers.lock().remove(&peer_id);
    info!("client {} departed", identity);
    result
}

/// Broker error types.
#[derive(Debug)]
pub enum BrokerError {
    Config(ConfigError),
    Bind(String),
    Store(String),
    Io(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::Store(s) => write!(f, "Store error: {}", s),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<ConfigError> for BrokerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
