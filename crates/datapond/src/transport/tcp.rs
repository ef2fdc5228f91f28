// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP client transport.
//!
//! Connects to a broker, announces its identity with a `Hello` frame, and
//! waits for the broker's `Hello` answer carrying the broker identity. A
//! background reader thread then decodes incoming frames and hands them to
//! the registered handlers, serially. Read errors and EOF mark the transport
//! disconnected; subsequent sends fail `TransportUnavailable`.

use crate::config::TcpConfig;
use crate::error::{Error, Result};
use crate::transport::{
    read_frame, write_frame, ClientRef, MessageKind, PackageHandler, Role, Transport,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// Peer id the broker is published under on this transport.
const BROKER_PEER_ID: u64 = 0;

/// Client-role transport over one TCP connection to a broker.
pub struct TcpTransport {
    identity: String,
    broker: ClientRef,
    writer: Mutex<TcpStream>,
    connected: AtomicBool,
    handlers: Mutex<HashMap<MessageKind, Arc<dyn PackageHandler>>>,
    sequence: AtomicU32,
}

impl TcpTransport {
    /// Connect to the broker and complete the identity handshake.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a bad configuration, `Io` on connect/handshake
    /// failures, `Protocol` if the broker answers with anything but `Hello`
    /// (e.g. it rejected a duplicate identity by closing the connection).
    pub fn connect(config: TcpConfig) -> Result<Arc<Self>> {
        config.validate().map_err(Error::InvalidArgument)?;

        let stream = TcpStream::connect_timeout(&config.broker_address, config.connect_timeout)?;
        stream.set_nodelay(true).ok();

        // Handshake runs under the connect timeout; steady-state reads block
        // indefinitely.
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        let mut handshake = stream.try_clone()?;
        write_frame(&mut handshake, MessageKind::Hello, 0, config.identity.as_bytes())?;
        let broker_identity = match read_frame(&mut handshake, config.max_message_size)? {
            Some((header, body)) if header.kind == MessageKind::Hello => {
                String::from_utf8(body)
                    .map_err(|_| Error::Protocol("broker identity is not UTF-8".into()))?
            }
            Some((header, _)) => {
                return Err(Error::Protocol(format!(
                    "expected Hello from broker, got {:?}",
                    header.kind
                )))
            }
            None => return Err(Error::Protocol("broker closed during handshake".into())),
        };
        stream.set_read_timeout(None).ok();

        let transport = Arc::new(Self {
            identity: config.identity.clone(),
            broker: ClientRef::new(BROKER_PEER_ID, &broker_identity),
            writer: Mutex::new(stream.try_clone()?),
            connected: AtomicBool::new(true),
            handlers: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(1),
        });

        let reader = Arc::downgrade(&transport);
        let max_message_size = config.max_message_size;
        thread::Builder::new()
            .name(format!("datapond-tcp-{}", config.identity))
            .spawn(move || read_loop(stream, reader, max_message_size))
            .map_err(Error::Io)?;

        log::debug!(
            "connected to broker {} as {}",
            transport.broker.identity(),
            transport.identity
        );
        Ok(transport)
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Broker identity learned during the handshake.
    pub fn broker_identity(&self) -> &str {
        self.broker.identity()
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

fn read_loop(mut stream: TcpStream, transport: Weak<TcpTransport>, max_message_size: usize) {
    loop {
        let frame = read_frame(&mut stream, max_message_size);
        let Some(transport) = transport.upgrade() else {
            return;
        };
        match frame {
            Ok(Some((header, body))) => {
                let handler = transport.handlers.lock().get(&header.kind).cloned();
                match handler {
                    Some(handler) => handler.on_package(&transport.broker, &header, &body),
                    None => log::debug!("no handler for incoming {:?}", header.kind),
                }
            }
            Ok(None) => {
                log::debug!("broker closed connection for {}", transport.identity);
                transport.mark_disconnected();
                return;
            }
            Err(e) => {
                if transport.is_connected() {
                    log::warn!("read error for {}: {}", transport.identity, e);
                }
                transport.mark_disconnected();
                return;
            }
        }
    }
}

impl Transport for TcpTransport {
    fn role(&self) -> Role {
        Role::Client
    }

    fn local_identity(&self) -> String {
        self.identity.clone()
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
        if target != &self.broker {
            // The broker routes everything; clients cannot address peers.
            return Err(Error::TransportUnavailable);
        }
        if !self.is_connected() {
            return Err(Error::TransportUnavailable);
        }
        let mut writer = self.writer.lock();
        write_frame(&mut *writer, kind, sequence, body).inspect_err(|_| {
            self.mark_disconnected();
        })
    }

    fn resolve(&self, identity: Option<&str>) -> Result<ClientRef> {
        if !self.is_connected() {
            return Err(Error::TransportUnavailable);
        }
        match identity {
            None => Ok(self.broker.clone()),
            Some(identity) if identity == self.broker.identity() => Ok(self.broker.clone()),
            Some(_) => Err(Error::TransportUnavailable),
        }
    }

    fn register_handler(&self, kind: MessageKind, handler: Arc<dyn PackageHandler>) {
        self.handlers.lock().insert(kind, handler);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Unblocks the reader thread.
        self.writer.lock().shutdown(Shutdown::Both).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::encode_frame;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Duration;

    fn fake_broker_accept(listener: TcpListener, answer_hello: bool) {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (header, body) = read_frame(&mut stream, 1 << 20).unwrap().unwrap();
            assert_eq!(header.kind, MessageKind::Hello);
            assert!(!body.is_empty());
            if answer_hello {
                let frame = encode_frame(MessageKind::Hello, 0, b"broker");
                stream.write_all(&frame).unwrap();
                // Hold the connection open briefly so the client settles.
                thread::sleep(Duration::from_millis(200));
            }
        });
    }

    fn config_for(listener: &TcpListener) -> TcpConfig {
        TcpConfig::new(listener.local_addr().unwrap(), "map-matcher")
            .with_connect_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_handshake_learns_broker_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = config_for(&listener);
        fake_broker_accept(listener, true);

        let transport = TcpTransport::connect(config).unwrap();
        assert_eq!(transport.broker_identity(), "broker");
        assert_eq!(transport.role(), Role::Client);
        assert!(transport.is_connected());

        let broker = transport.resolve(None).unwrap();
        assert_eq!(broker.identity(), "broker");
        assert!(matches!(
            transport.resolve(Some("some-other-client")),
            Err(Error::TransportUnavailable)
        ));
    }

    #[test]
    fn test_handshake_rejected_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = config_for(&listener);
        fake_broker_accept(listener, false);

        let result = TcpTransport::connect(config);
        assert!(result.is_err());
    }

    #[test]
    fn test_disconnect_fails_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = config_for(&listener);
        fake_broker_accept(listener, true);

        let transport = TcpTransport::connect(config).unwrap();
        let broker = transport.resolve(None).unwrap();

        // Wait for the fake broker to hang up.
        for _ in 0..100 {
            if !transport.is_connected() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(&broker, MessageKind::Request, 1, b"x"),
            Err(Error::TransportUnavailable)
        ));
        assert!(matches!(
            transport.resolve(None),
            Err(Error::TransportUnavailable)
        ));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = TcpConfig::new(addr, "map-matcher")
            .with_connect_timeout(Duration::from_millis(500));
        assert!(TcpTransport::connect(config).is_err());
    }
}
