// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element record wire codec.
//!
//! One record is one contiguous little-endian buffer: a presence bitmask
//! flags which optional fields are present, the fixed header stores each
//! variable-length field's offset and length, and the field bytes live in a
//! trailing region. The encoder computes the exact total size before writing
//! and allocates once; the decoder borrows the buffer and indexes into it by
//! stored offset without copying.
//!
//! A field whose validity bit is unset is *absent*, never an empty string or
//! a zero value.

use crate::error::{Error, Result};

/// Validity bit: element name present.
pub const VALID_NAME: u8 = 0x01;
/// Validity bit: scope flags (global/persistent) present.
pub const VALID_SCOPE: u8 = 0x02;
/// Validity bit: listener token present.
pub const VALID_LISTENER: u8 = 0x04;
/// Validity bit: payload present.
pub const VALID_PAYLOAD: u8 = 0x08;

const FLAG_GLOBAL: u8 = 0x01;
const FLAG_PERSISTENT: u8 = 0x02;

// validity(1) + flags(1) + token(8) + name off/len(8) + payload off/len(8)
const HEADER_LEN: usize = 26;

/// Builder for a single element record.
///
/// All fields are optional; the bitmask records which were supplied.
#[derive(Debug, Default)]
pub struct RecordBuilder<'a> {
    name: Option<&'a str>,
    scope: Option<(bool, bool)>,
    listener: Option<u64>,
    payload: Option<&'a [u8]>,
}

impl<'a> RecordBuilder<'a> {
    /// Start an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the element name.
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Set the scope flags (`global`, `persistent`).
    pub fn scope(mut self, global: bool, persistent: bool) -> Self {
        self.scope = Some((global, persistent));
        self
    }

    /// Set the opaque listener token.
    pub fn listener(mut self, token: u64) -> Self {
        self.listener = Some(token);
        self
    }

    /// Set the payload bytes.
    pub fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Exact encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + self.name.map_or(0, str::len)
            + self.payload.map_or(0, <[u8]>::len)
    }

    /// Encode into a single exactly-sized buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        let mut validity = 0u8;
        let mut flags = 0u8;
        if self.name.is_some() {
            validity |= VALID_NAME;
        }
        if let Some((global, persistent)) = self.scope {
            validity |= VALID_SCOPE;
            if global {
                flags |= FLAG_GLOBAL;
            }
            if persistent {
                flags |= FLAG_PERSISTENT;
            }
        }
        if self.listener.is_some() {
            validity |= VALID_LISTENER;
        }
        if self.payload.is_some() {
            validity |= VALID_PAYLOAD;
        }

        buf.push(validity);
        buf.push(flags);
        buf.extend_from_slice(&self.listener.unwrap_or(0).to_le_bytes());

        // Offsets are relative to the start of the trailing region.
        let name_len = self.name.map_or(0, str::len);
        let payload_len = self.payload.map_or(0, <[u8]>::len);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(name_len as u32).to_le_bytes());
        buf.extend_from_slice(&(name_len as u32).to_le_bytes());
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());

        if let Some(name) = self.name {
            buf.extend_from_slice(name.as_bytes());
        }
        if let Some(payload) = self.payload {
            buf.extend_from_slice(payload);
        }

        debug_assert_eq!(buf.len(), self.encoded_len());
        buf
    }
}

/// Zero-copy view over an encoded element record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    validity: u8,
    flags: u8,
    listener: u64,
    tail: &'a [u8],
    name_off: usize,
    name_len: usize,
    payload_off: usize,
    payload_len: usize,
}

impl<'a> RecordView<'a> {
    /// Parse a record, validating that every present field stays inside the
    /// buffer and that the name is UTF-8.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "record header truncated: {} bytes",
                buf.len()
            )));
        }

        let validity = buf[0];
        let flags = buf[1];
        let listener = u64::from_le_bytes(read8(buf, 2));
        let name_off = u32::from_le_bytes(read4(buf, 10)) as usize;
        let name_len = u32::from_le_bytes(read4(buf, 14)) as usize;
        let payload_off = u32::from_le_bytes(read4(buf, 18)) as usize;
        let payload_len = u32::from_le_bytes(read4(buf, 22)) as usize;
        let tail = &buf[HEADER_LEN..];

        let view = Self {
            validity,
            flags,
            listener,
            tail,
            name_off,
            name_len,
            payload_off,
            payload_len,
        };

        if validity & VALID_NAME != 0 {
            let bytes = view.field(name_off, name_len, "name")?;
            std::str::from_utf8(bytes)
                .map_err(|_| Error::Protocol("element name is not UTF-8".into()))?;
        }
        if validity & VALID_PAYLOAD != 0 {
            view.field(payload_off, payload_len, "payload")?;
        }
        Ok(view)
    }

    fn field(&self, off: usize, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = off.checked_add(len).ok_or_else(|| {
            Error::Protocol(format!("record {} range overflows", what))
        })?;
        self.tail.get(off..end).ok_or_else(|| {
            Error::Protocol(format!(
                "record {} [{}..{}] outside {}-byte region",
                what,
                off,
                end,
                self.tail.len()
            ))
        })
    }

    /// Element name, if present.
    pub fn name(&self) -> Option<&'a str> {
        if self.validity & VALID_NAME == 0 {
            return None;
        }
        // Bounds and UTF-8 were checked in parse().
        let bytes = &self.tail[self.name_off..self.name_off + self.name_len];
        std::str::from_utf8(bytes).ok()
    }

    /// Scope flags `(global, persistent)`, if present.
    pub fn scope(&self) -> Option<(bool, bool)> {
        if self.validity & VALID_SCOPE == 0 {
            return None;
        }
        Some((
            self.flags & FLAG_GLOBAL != 0,
            self.flags & FLAG_PERSISTENT != 0,
        ))
    }

    /// Opaque listener token, if present.
    pub fn listener(&self) -> Option<u64> {
        if self.validity & VALID_LISTENER == 0 {
            return None;
        }
        Some(self.listener)
    }

    /// Payload bytes, if present.
    pub fn payload(&self) -> Option<&'a [u8]> {
        if self.validity & VALID_PAYLOAD == 0 {
            return None;
        }
        Some(&self.tail[self.payload_off..self.payload_off + self.payload_len])
    }
}

fn read4(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

fn read8(buf: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[at..at + 8]);
    out
}
