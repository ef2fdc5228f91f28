// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process loopback transport.
//!
//! A hub connects one server-role endpoint and any number of client-role
//! endpoints inside a single process. One dispatch thread drains an unbounded
//! channel of envelopes and invokes the target endpoint's registered handler,
//! so every endpoint sees its packages serially, in send order. Sends never
//! block the sender.

use crate::error::{Error, Result};
use crate::transport::{ClientRef, MessageKind, PackageHandler, PackageHeader, Role, Transport};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

struct Envelope {
    to: u64,
    from: ClientRef,
    header: PackageHeader,
    body: Vec<u8>,
}

struct PeerState {
    id: u64,
    identity: String,
    handlers: Mutex<HashMap<MessageKind, Arc<dyn PackageHandler>>>,
}

struct HubShared {
    peers: Mutex<HashMap<u64, Arc<PeerState>>>,
    server_id: Mutex<Option<u64>>,
}

/// In-process hub wiring loopback endpoints together.
pub struct LoopbackHub {
    shared: Arc<HubShared>,
    tx: Sender<Envelope>,
    next_peer: AtomicU64,
}

impl LoopbackHub {
    /// Create a hub and start its dispatch thread.
    ///
    /// The thread exits when the hub and every endpoint created from it have
    /// been dropped.
    pub fn new() -> Self {
        let shared = Arc::new(HubShared {
            peers: Mutex::new(HashMap::new()),
            server_id: Mutex::new(None),
        });
        let (tx, rx) = unbounded::<Envelope>();

        let dispatch_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("loopback-dispatch".into())
            .spawn(move || {
                while let Ok(envelope) = rx.recv() {
                    let peer = dispatch_shared.peers.lock().get(&envelope.to).cloned();
                    let Some(peer) = peer else {
                        log::debug!("dropping frame for departed peer {}", envelope.to);
                        continue;
                    };
                    let handler = peer.handlers.lock().get(&envelope.header.kind).cloned();
                    match handler {
                        Some(handler) => {
                            handler.on_package(&envelope.from, &envelope.header, &envelope.body)
                        }
                        None => log::debug!(
                            "peer {} has no handler for {:?}",
                            peer.identity,
                            envelope.header.kind
                        ),
                    }
                }
            })
            .expect("spawning the loopback dispatch thread must succeed");

        Self {
            shared,
            tx,
            next_peer: AtomicU64::new(1),
        }
    }

    /// Register the server endpoint.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the hub already has a server or the identity is
    /// taken.
    pub fn server(&self, identity: &str) -> Result<Arc<LoopbackEndpoint>> {
        let endpoint = self.attach(identity, Role::Server)?;
        let claimed = {
            let mut server_id = self.shared.server_id.lock();
            if server_id.is_some() {
                false
            } else {
                *server_id = Some(endpoint.peer.id);
                true
            }
        };
        if !claimed {
            self.shared.peers.lock().remove(&endpoint.peer.id);
            return Err(Error::AlreadyExists);
        }
        Ok(endpoint)
    }

    /// Register a client endpoint.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the identity is taken.
    pub fn client(&self, identity: &str) -> Result<Arc<LoopbackEndpoint>> {
        self.attach(identity, Role::Client)
    }

    /// Remove an endpoint; subsequent sends to it fail `TransportUnavailable`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no endpoint with that identity is attached.
    pub fn disconnect(&self, identity: &str) -> Result<()> {
        let mut peers = self.shared.peers.lock();
        let id = peers
            .values()
            .find(|peer| peer.identity == identity)
            .map(|peer| peer.id)
            .ok_or(Error::NotFound)?;
        peers.remove(&id);
        drop(peers);

        let mut server_id = self.shared.server_id.lock();
        if *server_id == Some(id) {
            *server_id = None;
        }
        Ok(())
    }

    fn attach(&self, identity: &str, role: Role) -> Result<Arc<LoopbackEndpoint>> {
        let mut peers = self.shared.peers.lock();
        if peers.values().any(|peer| peer.identity == identity) {
            return Err(Error::AlreadyExists);
        }
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(PeerState {
            id,
            identity: identity.to_string(),
            handlers: Mutex::new(HashMap::new()),
        });
        peers.insert(id, Arc::clone(&peer));
        Ok(Arc::new(LoopbackEndpoint {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
            peer,
            role,
            sequence: AtomicU32::new(1),
        }))
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint attached to a [`LoopbackHub`].
pub struct LoopbackEndpoint {
    shared: Arc<HubShared>,
    tx: Sender<Envelope>,
    peer: Arc<PeerState>,
    role: Role,
    sequence: AtomicU32,
}

impl LoopbackEndpoint {
    fn self_ref(&self) -> ClientRef {
        ClientRef::new(self.peer.id, &self.peer.identity)
    }
}

impl Transport for LoopbackEndpoint {
    fn role(&self) -> Role {
        self.role
    }

    fn local_identity(&self) -> String {
        self.peer.identity.clone()
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
    ) -> Result<()> {
        if !self.shared.peers.lock().contains_key(&target.id()) {
            return Err(Error::TransportUnavailable);
        }
        self.tx
            .send(Envelope {
                to: target.id(),
                from: self.self_ref(),
                header: PackageHeader { kind, sequence },
                body: body.to_vec(),
            })
            .map_err(|_| Error::TransportUnavailable)
    }

    fn resolve(&self, identity: Option<&str>) -> Result<ClientRef> {
        match identity {
            None => {
                let id = (*self.shared.server_id.lock()).ok_or(Error::TransportUnavailable)?;
                let peers = self.shared.peers.lock();
                let peer = peers.get(&id).ok_or(Error::TransportUnavailable)?;
                Ok(ClientRef::new(peer.id, &peer.identity))
            }
            Some(identity) => {
                let peers = self.shared.peers.lock();
                let peer = peers
                    .values()
                    .find(|peer| peer.identity == identity)
                    .ok_or(Error::TransportUnavailable)?;
                Ok(ClientRef::new(peer.id, &peer.identity))
            }
        }
    }

    fn register_handler(&self, kind: MessageKind, handler: Arc<dyn PackageHandler>) {
        self.peer.handlers.lock().insert(kind, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        hits: AtomicUsize,
        last: Mutex<Vec<u8>>,
    }

    impl PackageHandler for Recorder {
        fn on_package(&self, _sender: &ClientRef, _header: &PackageHeader, body: &[u8]) {
            *self.last.lock() = body.to_vec();
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(recorder: &Recorder, hits: usize) {
        for _ in 0..200 {
            if recorder.hits.load(Ordering::SeqCst) >= hits {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("handler was not invoked");
    }

    #[test]
    fn test_send_reaches_handler() {
        let hub = LoopbackHub::new();
        let server = hub.server("broker").unwrap();
        let client = hub.client("client-a").unwrap();

        let recorder = Arc::new(Recorder {
            hits: AtomicUsize::new(0),
            last: Mutex::new(Vec::new()),
        });
        let handler: Arc<dyn PackageHandler> = recorder.clone();
        server.register_handler(MessageKind::Request, handler);

        let target = client.resolve(None).unwrap();
        client
            .send(&target, MessageKind::Request, 5, b"payload")
            .unwrap();

        wait_for(&recorder, 1);
        assert_eq!(*recorder.last.lock(), b"payload");
    }

    #[test]
    fn test_single_server_enforced() {
        let hub = LoopbackHub::new();
        hub.server("broker").unwrap();
        assert!(matches!(hub.server("broker-2"), Err(Error::AlreadyExists)));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let hub = LoopbackHub::new();
        hub.client("client-a").unwrap();
        assert!(matches!(hub.client("client-a"), Err(Error::AlreadyExists)));
    }

    #[test]
    fn test_resolve_without_server() {
        let hub = LoopbackHub::new();
        let client = hub.client("client-a").unwrap();
        assert!(matches!(
            client.resolve(None),
            Err(Error::TransportUnavailable)
        ));
    }

    #[test]
    fn test_disconnect_breaks_route() {
        let hub = LoopbackHub::new();
        let server = hub.server("broker").unwrap();
        let client = hub.client("client-a").unwrap();

        let target = client.resolve(None).unwrap();
        hub.disconnect("broker").unwrap();

        assert!(matches!(
            client.send(&target, MessageKind::Request, 1, b"x"),
            Err(Error::TransportUnavailable)
        ));
        assert!(matches!(
            client.resolve(None),
            Err(Error::TransportUnavailable)
        ));
        assert!(matches!(hub.disconnect("broker"), Err(Error::NotFound)));
        drop(server);
    }

    #[test]
    fn test_per_target_fifo_order() {
        let hub = LoopbackHub::new();
        let server = hub.server("broker").unwrap();
        let client = hub.client("client-a").unwrap();

        struct OrderCheck {
            seen: Mutex<Vec<u32>>,
            hits: AtomicUsize,
        }
        impl PackageHandler for OrderCheck {
            fn on_package(&self, _: &ClientRef, header: &PackageHeader, _: &[u8]) {
                self.seen.lock().push(header.sequence);
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
        }

        let check = Arc::new(OrderCheck {
            seen: Mutex::new(Vec::new()),
            hits: AtomicUsize::new(0),
        });
        let handler: Arc<dyn PackageHandler> = check.clone();
        server.register_handler(MessageKind::Notify, handler);

        let target = client.resolve(None).unwrap();
        for sequence in 0..64 {
            client
                .send(&target, MessageKind::Notify, sequence, &[])
                .unwrap();
        }

        for _ in 0..200 {
            if check.hits.load(Ordering::SeqCst) == 64 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let seen = check.seen.lock();
        assert_eq!(*seen, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_identity_resolution() {
        let hub = LoopbackHub::new();
        let server = hub.server("broker").unwrap();
        hub.client("client-a").unwrap();

        let resolved = server.resolve(Some("client-a")).unwrap();
        assert_eq!(resolved.identity(), "client-a");
        assert!(matches!(
            server.resolve(Some("client-b")),
            Err(Error::TransportUnavailable)
        ));
    }
}
