// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ponds: owner-scoped, name-keyed element collections, plus the server-side
//! pond directory.
//!
//! Each pond owns a single mutex guarding its element index and the listener
//! bookkeeping of its elements; no operation takes more than one pond lock.
//! Notify fan-out snapshots the value and listener set under the lock and
//! delivers after release, so the lock is never held across a socket write.

use crate::element::{Element, ListenerHandle, ListenerTarget};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot of one notify fan-out, taken under the pond lock.
///
/// The caller delivers it after the lock is released: local targets are
/// invoked inline, remote targets get a Notify frame.
#[derive(Debug)]
pub struct NotifyBatch {
    /// Element name, echoed into remote Notify records.
    pub name: String,
    /// Value at snapshot time (the new value when the notify carried one).
    pub payload: Vec<u8>,
    /// Listeners registered at snapshot time.
    pub listeners: Vec<(ListenerHandle, ListenerTarget)>,
}

/// A named container of elements.
pub struct Pond {
    owner: Option<String>,
    elements: Mutex<BTreeMap<String, Element>>,
}

impl Pond {
    /// Create an empty pond.
    ///
    /// `owner` is absent for the global pond and for a client's ephemeral
    /// pond; per-owner ponds on the server carry the owning client identity.
    pub fn new(owner: Option<String>) -> Self {
        Self {
            owner,
            elements: Mutex::new(BTreeMap::new()),
        }
    }

    /// Owning client identity, if any.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Bind a new element.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `name` is already bound in this pond.
    pub fn create(&self, name: &str, persistent: bool, creator: Option<&str>) -> Result<()> {
        use std::collections::btree_map::Entry;
        let mut elements = self.elements.lock();
        match elements.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(Element::new(persistent, creator.map(str::to_string)));
                Ok(())
            }
        }
    }

    /// Whether `name` is bound in this pond.
    pub fn exists(&self, name: &str) -> bool {
        self.elements.lock().contains_key(name)
    }

    /// Read the current value.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound.
    pub fn get_value(&self, name: &str) -> Result<Vec<u8>> {
        let elements = self.elements.lock();
        let element = elements.get(name).ok_or(Error::NotFound)?;
        Ok(element.value().to_vec())
    }

    /// Unconditionally replace the value.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound.
    pub fn set_value(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut elements = self.elements.lock();
        let element = elements.get_mut(name).ok_or(Error::NotFound)?;
        element.set_value(bytes);
        Ok(())
    }

    /// Replace the value (when `payload` is given) and snapshot the fan-out.
    ///
    /// With no payload the *current stored* value is snapshotted (replay),
    /// which is empty for an element that was never written.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound.
    pub fn notify(&self, name: &str, payload: Option<&[u8]>) -> Result<NotifyBatch> {
        let mut elements = self.elements.lock();
        let element = elements.get_mut(name).ok_or(Error::NotFound)?;
        if let Some(bytes) = payload {
            element.set_value(bytes);
        }
        Ok(NotifyBatch {
            name: name.to_string(),
            payload: element.value().to_vec(),
            listeners: element.snapshot_listeners(),
        })
    }

    /// Register a listener on an element.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound; `AlreadyExists` if `handle` is.
    pub fn add_listener(
        &self,
        name: &str,
        handle: ListenerHandle,
        target: ListenerTarget,
    ) -> Result<()> {
        let mut elements = self.elements.lock();
        let element = elements.get_mut(name).ok_or(Error::NotFound)?;
        element.add_listener(handle, target)
    }

    /// Unregister a listener from an element.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound or `handle` is not registered.
    pub fn remove_listener(&self, name: &str, handle: ListenerHandle) -> Result<()> {
        let mut elements = self.elements.lock();
        let element = elements.get_mut(name).ok_or(Error::NotFound)?;
        element.remove_listener(handle)
    }

    /// Unbind an element.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is not bound; `NotAuthorized` if the element
    /// records a creator identity and `remover` does not match it.
    pub fn remove(&self, name: &str, remover: Option<&str>) -> Result<()> {
        let mut elements = self.elements.lock();
        let element = elements.get(name).ok_or(Error::NotFound)?;
        if let Some(creator) = element.creator() {
            if remover != Some(creator) {
                return Err(Error::NotAuthorized);
            }
        }
        elements.remove(name);
        Ok(())
    }

    /// Number of bound elements.
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    /// Whether the pond has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }
}

/// Server-side directory of per-owner ponds.
///
/// The directory mutex is held only to look up or insert a pond entry, never
/// while touching a pond's contents. Entries are never evicted; per-owner
/// ponds live for the server process lifetime.
pub struct PondDirectory {
    ponds: Mutex<BTreeMap<String, Arc<Pond>>>,
}

impl PondDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            ponds: Mutex::new(BTreeMap::new()),
        }
    }

    /// Find or lazily create the pond owned by `owner`. Idempotent.
    pub fn get_or_create(&self, owner: &str) -> Arc<Pond> {
        let mut ponds = self.ponds.lock();
        Arc::clone(
            ponds
                .entry(owner.to_string())
                .or_insert_with(|| Arc::new(Pond::new(Some(owner.to_string())))),
        )
    }

    /// Find the pond owned by `owner` without creating it.
    pub fn find(&self, owner: &str) -> Option<Arc<Pond>> {
        self.ponds.lock().get(owner).map(Arc::clone)
    }

    /// Number of ponds created so far.
    pub fn len(&self) -> usize {
        self.ponds.lock().len()
    }

    /// Whether no pond has been created yet.
    pub fn is_empty(&self) -> bool {
        self.ponds.lock().is_empty()
    }
}

impl Default for PondDirectory {
    fn default() -> Self {
        Self::new()
    }
}
