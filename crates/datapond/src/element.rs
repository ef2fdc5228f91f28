// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element: one named mutable byte value plus its listener set.

use crate::error::{Error, Result};
use crate::transport::ClientRef;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque listener token minted by the registering side.
pub type ListenerHandle = u64;

/// Callback invoked with the notified value.
///
/// Local listeners run synchronously on the notifying thread (or on the
/// dispatch thread for notifications arriving from a remote pond); they must
/// not block.
pub type ListenerFn = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Where a notification for one registered handle is delivered.
#[derive(Clone)]
pub enum ListenerTarget {
    /// Invoke in-process, inline, before `notify` returns.
    Local(ListenerFn),
    /// Encode a Notify frame to the registering client, fire-and-forget.
    Remote(ClientRef),
}

impl std::fmt::Debug for ListenerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerTarget::Local(_) => write!(f, "Local"),
            ListenerTarget::Remote(client) => write!(f, "Remote({})", client.identity()),
        }
    }
}

/// One named value in a pond.
#[derive(Debug)]
pub struct Element {
    persistent: bool,
    creator: Option<String>,
    value: Vec<u8>,
    listeners: BTreeMap<ListenerHandle, ListenerTarget>,
}

impl Element {
    /// Create an element with no value and no listeners.
    ///
    /// `creator` is recorded only when the creating caller is a remote party;
    /// it gates removal (see [`Element::creator`]).
    pub fn new(persistent: bool, creator: Option<String>) -> Self {
        Self {
            persistent,
            creator,
            value: Vec::new(),
            listeners: BTreeMap::new(),
        }
    }

    /// Whether the element was created with the persistent flag.
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Identity recorded at creation, when the creator was remote.
    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    /// Unconditionally replace the value.
    pub fn set_value(&mut self, bytes: &[u8]) {
        self.value.clear();
        self.value.extend_from_slice(bytes);
    }

    /// Current value; empty until the first write. Never fails.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Register a listener.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `handle` is already registered; the listener set is
    /// left unchanged.
    pub fn add_listener(&mut self, handle: ListenerHandle, target: ListenerTarget) -> Result<()> {
        use std::collections::btree_map::Entry;
        match self.listeners.entry(handle) {
            Entry::Occupied(_) => Err(Error::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(target);
                Ok(())
            }
        }
    }

    /// Unregister a listener.
    ///
    /// # Errors
    ///
    /// `NotFound` if `handle` is not registered.
    pub fn remove_listener(&mut self, handle: ListenerHandle) -> Result<()> {
        self.listeners.remove(&handle).map(|_| ()).ok_or(Error::NotFound)
    }

    /// Snapshot the listener set for fan-out after the pond lock is released.
    pub fn snapshot_listeners(&self) -> Vec<(ListenerHandle, ListenerTarget)> {
        self.listeners
            .iter()
            .map(|(handle, target)| (*handle, target.clone()))
            .collect()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> ListenerTarget {
        ListenerTarget::Local(Arc::new(|_| {}))
    }

    #[test]
    fn test_value_empty_until_first_write() {
        let element = Element::new(false, None);
        assert!(element.value().is_empty());
    }

    #[test]
    fn test_set_value_replaces() {
        let mut element = Element::new(false, None);
        element.set_value(b"42");
        element.set_value(b"43");
        assert_eq!(element.value(), b"43");
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let mut element = Element::new(false, None);
        element.add_listener(7, noop()).unwrap();
        assert!(matches!(
            element.add_listener(7, noop()),
            Err(Error::AlreadyExists)
        ));
        assert_eq!(element.listener_count(), 1);
    }

    #[test]
    fn test_remove_unregistered_listener_rejected() {
        let mut element = Element::new(false, None);
        assert!(matches!(element.remove_listener(9), Err(Error::NotFound)));

        element.add_listener(9, noop()).unwrap();
        element.remove_listener(9).unwrap();
        assert!(matches!(element.remove_listener(9), Err(Error::NotFound)));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);

        let mut element = Element::new(false, None);
        element
            .add_listener(
                1,
                ListenerTarget::Local(Arc::new(move |_| {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let snapshot = element.snapshot_listeners();
        element.remove_listener(1).unwrap();

        // Delivery to a snapshot still reaches listeners removed afterwards.
        for (_, target) in &snapshot {
            if let ListenerTarget::Local(callback) = target {
                callback(b"value");
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_creator_recorded() {
        let element = Element::new(true, Some("fusion-service".into()));
        assert_eq!(element.creator(), Some("fusion-service"));
        assert!(element.persistent());

        let element = Element::new(false, None);
        assert_eq!(element.creator(), None);
    }
}
