// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store wire protocol.
//!
//! Three message bodies travel over the transport frames:
//!
//! - **Request** (client to server): a store-level or element-level action, a
//!   needs-reply flag, and the target element's record.
//! - **Reply** (server to client): a result code plus the echoed element
//!   record, with the payload filled in for `GetData`.
//! - **Notify** (server to client): the bare element record carrying the
//!   payload and the opaque listener token supplied at registration.

use crate::error::{Error, Result, ResultCode};
use crate::record::RecordView;

const OWNER_STORE: u8 = 1;
const OWNER_ELEMENT: u8 = 2;

/// Store-level actions: resolve scope and location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreAction {
    /// Bind a new element in the resolved pond.
    Create = 1,
    /// Look an element up without touching its data.
    Get = 2,
    /// Unbind an element, subject to creator authorization.
    Remove = 3,
    /// Existence probe against the sender's persistent pond.
    CheckExists = 4,
}

/// Element-level actions: act on an already-resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementAction {
    /// Read the current value.
    GetData = 1,
    /// Unconditionally replace the value.
    SetData = 2,
    /// Replace (when a payload is given) and fan out to listeners.
    Notify = 3,
    /// Register a listener token for the sending client.
    AddListener = 4,
    /// Unregister a listener token.
    RemoveListener = 5,
}

/// Either half of the action space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Store-level action.
    Store(StoreAction),
    /// Element-level action.
    Element(ElementAction),
}

impl Action {
    fn to_wire(self) -> (u8, u8) {
        match self {
            Action::Store(a) => (OWNER_STORE, a as u8),
            Action::Element(a) => (OWNER_ELEMENT, a as u8),
        }
    }

    fn from_wire(owner: u8, action: u8) -> Result<Self> {
        match owner {
            OWNER_STORE => {
                let a = match action {
                    1 => StoreAction::Create,
                    2 => StoreAction::Get,
                    3 => StoreAction::Remove,
                    4 => StoreAction::CheckExists,
                    other => {
                        return Err(Error::Protocol(format!("unknown store action {}", other)))
                    }
                };
                Ok(Action::Store(a))
            }
            OWNER_ELEMENT => {
                let a = match action {
                    1 => ElementAction::GetData,
                    2 => ElementAction::SetData,
                    3 => ElementAction::Notify,
                    4 => ElementAction::AddListener,
                    5 => ElementAction::RemoveListener,
                    other => {
                        return Err(Error::Protocol(format!("unknown element action {}", other)))
                    }
                };
                Ok(Action::Element(a))
            }
            other => Err(Error::Protocol(format!("unknown action owner {}", other))),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Encode a Request body around an already-encoded element record.
pub fn encode_request(action: Action, need_reply: bool, record: &[u8]) -> Vec<u8> {
    let (owner, act) = action.to_wire();
    let mut buf = Vec::with_capacity(3 + record.len());
    buf.push(owner);
    buf.push(act);
    buf.push(u8::from(need_reply));
    buf.extend_from_slice(record);
    buf
}

/// Decoded view of a Request body.
#[derive(Debug)]
pub struct RequestView<'a> {
    /// Requested action.
    pub action: Action,
    /// Whether the sender blocks on a Reply.
    pub need_reply: bool,
    /// Target element record.
    pub record: RecordView<'a>,
}

impl<'a> RequestView<'a> {
    /// Parse a Request body.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.len() < 3 {
            return Err(Error::Protocol("request body truncated".into()));
        }
        let action = Action::from_wire(body[0], body[1])?;
        let need_reply = body[2] != 0;
        let record = RecordView::parse(&body[3..])?;
        Ok(Self {
            action,
            need_reply,
            record,
        })
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Encode a Reply body around an already-encoded element record.
pub fn encode_reply(result: ResultCode, record: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + record.len());
    buf.push(result as u8);
    buf.extend_from_slice(record);
    buf
}

/// Decoded view of a Reply body.
#[derive(Debug)]
pub struct ReplyView<'a> {
    /// Server-side outcome.
    pub result: ResultCode,
    /// Echoed element record, payload filled for `GetData`.
    pub record: RecordView<'a>,
}

impl<'a> ReplyView<'a> {
    /// Parse a Reply body.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::Protocol("reply body truncated".into()));
        }
        let result = ResultCode::from_wire(body[0])?;
        let record = RecordView::parse(&body[1..])?;
        Ok(Self { result, record })
    }
}

// A Notify body is the bare element record; decode with `RecordView::parse`.
