// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction.
//!
//! The store depends only on the [`Transport`] trait: a role, an identity,
//! sequence allocation, frame delivery to a named peer, and handler
//! registration. All incoming packages for one endpoint are delivered
//! serially by a single dispatch thread owned by the transport.
//!
//! Two implementations ship with the crate: an in-process [`loopback`] hub
//! and a [`tcp`] client. The broker binary provides the TCP server side.

pub mod loopback;
pub mod tcp;

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::sync::Arc;

/// Role a transport endpoint was created with.
///
/// The store binds its role exactly once, at construction, from this value;
/// there is no runtime role transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authoritative endpoint: hosts the global pond and all persistent ponds.
    Server,
    /// Client endpoint: owns an ephemeral pond, reaches the rest remotely.
    Client,
    /// Endpoint whose role could not be established.
    Unknown,
}

/// Wire frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Transport-level identity handshake; never seen by the store.
    Hello = 0,
    /// Client-to-server store or element action.
    Request = 1,
    /// Server-to-client result for a Request that asked for one.
    Reply = 2,
    /// Server-to-client listener notification, fire-and-forget.
    Notify = 3,
}

impl MessageKind {
    /// Decode a frame kind byte.
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageKind::Hello),
            1 => Ok(MessageKind::Request),
            2 => Ok(MessageKind::Reply),
            3 => Ok(MessageKind::Notify),
            other => Err(Error::Protocol(format!("unknown frame kind {}", other))),
        }
    }
}

/// Header delivered alongside every incoming package.
#[derive(Debug, Clone, Copy)]
pub struct PackageHeader {
    /// Frame kind.
    pub kind: MessageKind,
    /// Transport-assigned sequence id; replies echo the request's.
    pub sequence: u32,
}

/// Cheap, cloneable handle naming a peer on a transport.
///
/// Equality is by transport-local id; the identity string is the peer's
/// self-announced name.
#[derive(Debug, Clone)]
pub struct ClientRef {
    id: u64,
    identity: Arc<str>,
}

impl ClientRef {
    /// Build a reference from a transport-local id and a peer identity.
    pub fn new(id: u64, identity: &str) -> Self {
        Self {
            id,
            identity: identity.into(),
        }
    }

    /// Transport-local peer id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer identity string.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl PartialEq for ClientRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientRef {}

/// Receiver for incoming packages of one kind.
pub trait PackageHandler: Send + Sync {
    /// Called on the transport's dispatch thread for every matching frame.
    fn on_package(&self, sender: &ClientRef, header: &PackageHeader, body: &[u8]);
}

/// Request/reply/notify carrier between store endpoints.
pub trait Transport: Send + Sync {
    /// Role this endpoint was created with.
    fn role(&self) -> Role;

    /// Identity this endpoint announces to peers.
    fn local_identity(&self) -> String;

    /// Allocate the sequence id for an outgoing frame.
    fn next_sequence(&self) -> u32;

    /// Send one frame to `target`.
    ///
    /// # Errors
    ///
    /// `TransportUnavailable` if the peer is unknown or disconnected.
    fn send(&self, target: &ClientRef, kind: MessageKind, sequence: u32, body: &[u8])
        -> Result<()>;

    /// Resolve a peer by identity; `None` resolves to the server.
    ///
    /// # Errors
    ///
    /// `TransportUnavailable` if no such peer is connected.
    fn resolve(&self, identity: Option<&str>) -> Result<ClientRef>;

    /// Register the handler invoked for incoming frames of `kind`.
    fn register_handler(&self, kind: MessageKind, handler: Arc<dyn PackageHandler>);
}

// ============================================================================
// Frame codec (shared by the TCP transport and the broker)
// ============================================================================

// u32-be length | u8 kind | u32-le sequence | body
const FRAME_HEADER_LEN: usize = 5;

/// Encode one frame ready for a stream write.
pub fn encode_frame(kind: MessageKind, sequence: u32, body: &[u8]) -> Vec<u8> {
    let len = (FRAME_HEADER_LEN + body.len()) as u32;
    let mut buf = Vec::with_capacity(4 + len as usize);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(kind as u8);
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Write one frame to a stream.
pub fn write_frame<W: Write>(
    w: &mut W,
    kind: MessageKind,
    sequence: u32,
    body: &[u8],
) -> Result<()> {
    let frame = encode_frame(kind, sequence, body);
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// Read one frame from a stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub fn read_frame<R: Read>(
    r: &mut R,
    max_message_size: usize,
) -> Result<Option<(PackageHeader, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len < FRAME_HEADER_LEN || len > max_message_size {
        return Err(Error::Protocol(format!("invalid frame length {}", len)));
    }

    let mut frame = vec![0u8; len];
    r.read_exact(&mut frame)?;

    let kind = MessageKind::from_wire(frame[0])?;
    let sequence = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
    frame.drain(..FRAME_HEADER_LEN);

    Ok(Some((PackageHeader { kind, sequence }, frame)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let body = b"element record bytes";
        let encoded = encode_frame(MessageKind::Request, 77, body);

        let mut cursor = Cursor::new(encoded);
        let (header, read_body) = read_frame(&mut cursor, 1024).unwrap().unwrap();
        assert_eq!(header.kind, MessageKind::Request);
        assert_eq!(header.sequence, 77);
        assert_eq!(read_body, body);
    }

    #[test]
    fn test_frame_eof_at_boundary() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor, 1024).unwrap().is_none());
    }

    #[test]
    fn test_frame_oversized_rejected() {
        let encoded = encode_frame(MessageKind::Notify, 1, &[0u8; 64]);
        let mut cursor = Cursor::new(encoded);
        let err = read_frame(&mut cursor, 16).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_frame_unknown_kind_rejected() {
        let mut encoded = encode_frame(MessageKind::Reply, 1, b"x");
        encoded[4] = 0x7f;
        let mut cursor = Cursor::new(encoded);
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_client_ref_equality_is_by_id() {
        let a = ClientRef::new(3, "fusion-service");
        let b = ClientRef::new(3, "fusion-service");
        let c = ClientRef::new(4, "fusion-service");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
