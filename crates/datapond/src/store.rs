// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store facade: the public create/get/remove and element data/listener API.
//!
//! A [`DataPool`] is an explicit context object constructed once per process
//! from an injected [`Transport`]; its role (server or client) is bound at
//! construction and never changes. The facade resolves each operation's scope
//! against the storage matrix:
//!
//! | global | persistent | storage location                         |
//! |--------|------------|------------------------------------------|
//! | true   | (ignored)  | global pond, on the server               |
//! | false  | true       | per-owner pond on the server             |
//! | false  | false      | the calling client's own ephemeral pond  |
//!
//! Nothing is ever written to disk: "persistent" ponds outlive their owning
//! client's connection but not the server process. A server restart starts
//! from an empty global pond and an empty directory.

use crate::config::PoolConfig;
use crate::correlator::PendingRequests;
use crate::element::{ListenerFn, ListenerHandle, ListenerTarget};
use crate::error::{Error, Result, ResultCode};
use crate::pond::{NotifyBatch, Pond, PondDirectory};
use crate::protocol::{
    encode_reply, encode_request, Action, ElementAction, RequestView, ReplyView, StoreAction,
};
use crate::record::{RecordBuilder, RecordView};
use crate::transport::{ClientRef, MessageKind, PackageHandler, PackageHeader, Role, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// The process-wide named-value store.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Clone)]
pub struct DataPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    role: Role,
    identity: String,
    transport: Arc<dyn Transport>,
    config: PoolConfig,
    /// Ephemeral pond, lives for this process only.
    local: Arc<Pond>,
    /// Global pond, server role only.
    global: Option<Arc<Pond>>,
    /// Per-owner persistent ponds, server role only.
    directory: Option<PondDirectory>,
    pending: PendingRequests,
    /// Client-side token-to-callback table for remotely registered listeners.
    callbacks: Mutex<HashMap<ListenerHandle, ListenerFn>>,
    next_token: AtomicU64,
}

struct PoolHandler {
    inner: Weak<PoolInner>,
}

impl PackageHandler for PoolHandler {
    fn on_package(&self, sender: &ClientRef, header: &PackageHeader, body: &[u8]) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match header.kind {
            MessageKind::Request => inner.handle_request(sender, header, body),
            MessageKind::Reply => inner.handle_reply(header, body),
            MessageKind::Notify => inner.handle_notify(body),
            MessageKind::Hello => {}
        }
    }
}

impl DataPool {
    /// Create a store over `transport` with the default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(transport, PoolConfig::default())
    }

    /// Create a store over `transport`.
    ///
    /// Binds the role exactly once from [`Transport::role`] and registers the
    /// package handlers for that role.
    ///
    /// # Errors
    ///
    /// `Unsupported` if the transport's role is unknown; `InvalidArgument` if
    /// the configuration fails validation.
    pub fn with_config(transport: Arc<dyn Transport>, config: PoolConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;

        let role = transport.role();
        if role == Role::Unknown {
            return Err(Error::Unsupported);
        }
        let is_server = role == Role::Server;

        let inner = Arc::new(PoolInner {
            role,
            identity: transport.local_identity(),
            transport: Arc::clone(&transport),
            config,
            local: Arc::new(Pond::new(None)),
            global: is_server.then(|| Arc::new(Pond::new(None))),
            directory: is_server.then(PondDirectory::new),
            pending: PendingRequests::new(),
            callbacks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        });

        let handler = Arc::new(PoolHandler {
            inner: Arc::downgrade(&inner),
        });
        if is_server {
            transport.register_handler(MessageKind::Request, handler);
        } else {
            let reply_handler: Arc<dyn PackageHandler> = handler.clone();
            transport.register_handler(MessageKind::Reply, reply_handler);
            transport.register_handler(MessageKind::Notify, handler);
        }

        log::debug!(
            "datapool bound as {:?} for identity {}",
            role,
            inner.identity
        );
        Ok(Self { inner })
    }

    /// Role this store was bound with.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Identity this store's transport announces.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Bind a new element and return a handle to it.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is already bound in the target pond (for
    /// an ephemeral create, also if the name is bound in the owner's
    /// persistent pond on the server); `InvalidArgument` on an empty name;
    /// remote failures per [`PoolElement`] operations.
    pub fn create_element(
        &self,
        name: &str,
        global: bool,
        persistent: bool,
    ) -> Result<PoolElement> {
        self.inner.create_element(name, global, persistent)?;
        Ok(PoolElement {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            global,
            persistent,
        })
    }

    /// Look up an existing element and return a handle to it.
    ///
    /// # Errors
    ///
    /// `NotFound` if the name is not bound in the resolved pond.
    pub fn get_element(&self, name: &str, global: bool) -> Result<PoolElement> {
        let persistent = self.inner.get_element(name, global)?;
        Ok(PoolElement {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            global,
            persistent,
        })
    }

    /// Unbind an element.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `NotAuthorized` if the element records a creator
    /// identity different from this store's identity.
    pub fn remove_element(&self, name: &str, global: bool) -> Result<()> {
        self.inner.remove_element(name, global)
    }
}

/// Handle to one element, bound to its resolved scope.
///
/// All data and listener operations go through the owning [`DataPool`]'s
/// role logic; the handle itself holds no element state.
#[derive(Clone)]
pub struct PoolElement {
    inner: Arc<PoolInner>,
    name: String,
    global: bool,
    persistent: bool,
}

impl PoolElement {
    /// Element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the element is globally visible.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Whether the element outlives its owning client's connection.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Unconditionally replace the element's value.
    pub fn set_data(&self, bytes: &[u8]) -> Result<()> {
        self.inner.set_data(&self.name, self.global, self.persistent, bytes)
    }

    /// Read the element's current value; empty until the first write.
    pub fn get_data(&self) -> Result<Vec<u8>> {
        self.inner.get_data(&self.name, self.global, self.persistent)
    }

    /// Fan the value out to every listener.
    ///
    /// With a payload the value is first replaced and the new value fans out;
    /// with `None` the current stored value is re-delivered (replay), which
    /// is empty for an element that was never written. In-process listeners
    /// run inline before this returns; remote listeners are fire-and-forget.
    pub fn notify(&self, payload: Option<&[u8]>) -> Result<()> {
        self.inner.notify(&self.name, self.global, self.persistent, payload)
    }

    /// Register a change listener; returns the minted opaque handle.
    pub fn add_listener(
        &self,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<ListenerHandle> {
        self.inner
            .add_listener(&self.name, self.global, self.persistent, Arc::new(callback))
    }

    /// Unregister a previously added listener.
    pub fn remove_listener(&self, handle: ListenerHandle) -> Result<()> {
        self.inner
            .remove_listener(&self.name, self.global, self.persistent, handle)
    }
}

// ============================================================================
// Scope resolution and caller-side execution
// ============================================================================

impl PoolInner {
    fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    fn global_pond(&self) -> &Arc<Pond> {
        // Only reachable in server role; construction guarantees presence.
        self.global.as_ref().expect("server role has a global pond")
    }

    fn directory(&self) -> &PondDirectory {
        self.directory
            .as_ref()
            .expect("server role has a pond directory")
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("element name is empty"));
        }
        Ok(())
    }

    /// Server-side: the pond that holds (or would hold) `name` for this
    /// process's own operations. Non-global names try the ephemeral pond
    /// first, then the server's identity-keyed persistent pond.
    fn own_pond(&self, name: &str, global: bool) -> Arc<Pond> {
        if global {
            Arc::clone(self.global_pond())
        } else if self.local.exists(name) {
            Arc::clone(&self.local)
        } else {
            self.directory().get_or_create(&self.identity)
        }
    }

    fn create_element(&self, name: &str, global: bool, persistent: bool) -> Result<()> {
        Self::check_name(name)?;

        if self.is_server() {
            if global {
                return self.global_pond().create(name, persistent, None);
            }
            let own = self.directory().get_or_create(&self.identity);
            if self.local.exists(name) || own.exists(name) {
                return Err(Error::AlreadyExists);
            }
            if persistent {
                own.create(name, true, None)
            } else {
                self.local.create(name, false, None)
            }
        } else {
            if !global && self.local.exists(name) {
                return Err(Error::AlreadyExists);
            }
            if !global && !persistent {
                // An ephemeral name must not shadow a persistent one on the
                // server for the same owner.
                let check = Action::Store(StoreAction::CheckExists);
                match self.remote_call(check, name, global, persistent, None, None) {
                    Ok(_) => return Err(Error::AlreadyExists),
                    Err(Error::NotFound) => {}
                    Err(e) => return Err(e),
                }
                return self.local.create(name, false, None);
            }
            let create = Action::Store(StoreAction::Create);
            self.remote_call(create, name, global, persistent, None, None)
                .map(|_| ())
        }
    }

    /// Resolve an element for a handle; returns its effective persistence.
    fn get_element(&self, name: &str, global: bool) -> Result<bool> {
        Self::check_name(name)?;

        if self.is_server() {
            let pond = self.own_pond(name, global);
            if pond.exists(name) {
                return Ok(!global && !Arc::ptr_eq(&pond, &self.local));
            }
            return Err(Error::NotFound);
        }

        if !global && self.local.exists(name) {
            return Ok(false);
        }
        self.remote_call(Action::Store(StoreAction::Get), name, global, !global, None, None)?;
        // Remote non-global elements live in the owner's persistent pond.
        Ok(!global)
    }

    fn remove_element(&self, name: &str, global: bool) -> Result<()> {
        Self::check_name(name)?;

        if self.is_server() {
            if global {
                return self.global_pond().remove(name, Some(&self.identity));
            }
            match self.local.remove(name, None) {
                Err(Error::NotFound) => self
                    .directory()
                    .get_or_create(&self.identity)
                    .remove(name, Some(&self.identity)),
                other => other,
            }
        } else {
            if !global {
                match self.local.remove(name, None) {
                    Err(Error::NotFound) => {}
                    other => return other,
                }
            }
            self.remote_call(Action::Store(StoreAction::Remove), name, global, false, None, None)
                .map(|_| ())
        }
    }

    fn set_data(&self, name: &str, global: bool, persistent: bool, bytes: &[u8]) -> Result<()> {
        Self::check_name(name)?;

        if self.is_server() {
            return self.own_pond(name, global).set_value(name, bytes);
        }
        if !global && self.local.exists(name) {
            return self.local.set_value(name, bytes);
        }
        let set = Action::Element(ElementAction::SetData);
        self.remote_call(set, name, global, persistent, Some(bytes), None)
            .map(|_| ())
    }

    fn get_data(&self, name: &str, global: bool, persistent: bool) -> Result<Vec<u8>> {
        Self::check_name(name)?;

        if self.is_server() {
            return self.own_pond(name, global).get_value(name);
        }
        if !global && self.local.exists(name) {
            return self.local.get_value(name);
        }
        let get = Action::Element(ElementAction::GetData);
        let payload = self.remote_call(get, name, global, persistent, None, None)?;
        Ok(payload.unwrap_or_default())
    }

    fn notify(
        &self,
        name: &str,
        global: bool,
        persistent: bool,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        Self::check_name(name)?;

        if self.is_server() {
            let batch = self.own_pond(name, global).notify(name, payload)?;
            self.deliver(batch);
            return Ok(());
        }
        if !global && self.local.exists(name) {
            let batch = self.local.notify(name, payload)?;
            self.deliver(batch);
            return Ok(());
        }
        let notify = Action::Element(ElementAction::Notify);
        self.remote_call(notify, name, global, persistent, payload, None)
            .map(|_| ())
    }

    fn add_listener(
        &self,
        name: &str,
        global: bool,
        persistent: bool,
        callback: ListenerFn,
    ) -> Result<ListenerHandle> {
        Self::check_name(name)?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        if self.is_server() {
            self.own_pond(name, global)
                .add_listener(name, token, ListenerTarget::Local(callback))?;
            return Ok(token);
        }
        if !global && self.local.exists(name) {
            self.local
                .add_listener(name, token, ListenerTarget::Local(callback))?;
            return Ok(token);
        }

        // Remote: park the callback locally, ship only the opaque token.
        self.callbacks.lock().insert(token, callback);
        let add = Action::Element(ElementAction::AddListener);
        match self.remote_call(add, name, global, persistent, None, Some(token)) {
            Ok(_) => Ok(token),
            Err(e) => {
                self.callbacks.lock().remove(&token);
                Err(e)
            }
        }
    }

    fn remove_listener(
        &self,
        name: &str,
        global: bool,
        persistent: bool,
        handle: ListenerHandle,
    ) -> Result<()> {
        Self::check_name(name)?;

        if self.is_server() {
            return self.own_pond(name, global).remove_listener(name, handle);
        }
        if !global && self.local.exists(name) {
            return self.local.remove_listener(name, handle);
        }

        let remove = Action::Element(ElementAction::RemoveListener);
        let result = self.remote_call(remove, name, global, persistent, None, Some(handle));
        if result.is_ok() {
            self.callbacks.lock().remove(&handle);
        }
        result.map(|_| ())
    }

    /// One synchronous round trip to the server.
    ///
    /// Registers the pending slot before the frame is written, then blocks
    /// until the correlated reply or the configured deadline.
    fn remote_call(
        &self,
        action: Action,
        name: &str,
        global: bool,
        persistent: bool,
        payload: Option<&[u8]>,
        listener: Option<ListenerHandle>,
    ) -> Result<Option<Vec<u8>>> {
        let mut builder = RecordBuilder::new().name(name).scope(global, persistent);
        if let Some(bytes) = payload {
            builder = builder.payload(bytes);
        }
        if let Some(token) = listener {
            builder = builder.listener(token);
        }
        let record = builder.encode();
        let body = encode_request(action, true, &record);
        if body.len() > self.config.max_message_size {
            return Err(Error::InvalidArgument("message exceeds maximum size"));
        }

        let server = self.transport.resolve(None)?;
        let sequence = self.transport.next_sequence();
        let guard = self.pending.register(sequence);
        self.transport
            .send(&server, MessageKind::Request, sequence, &body)?;

        let reply = guard.wait(self.config.reply_timeout)?;
        let view = ReplyView::parse(&reply)?;
        match view.record.name() {
            Some(echoed) if echoed == name => {}
            other => {
                return Err(Error::Protocol(format!(
                    "reply for {:?} does not match request for {:?}",
                    other, name
                )))
            }
        }
        view.result.into_result()?;
        Ok(view.record.payload().map(<[u8]>::to_vec))
    }

    /// Deliver a snapshot taken under a pond lock: local listeners inline,
    /// remote listeners as fire-and-forget Notify frames.
    fn deliver(&self, batch: NotifyBatch) {
        for (token, target) in &batch.listeners {
            match target {
                ListenerTarget::Local(callback) => callback(&batch.payload),
                ListenerTarget::Remote(client) => {
                    let record = RecordBuilder::new()
                        .name(&batch.name)
                        .listener(*token)
                        .payload(&batch.payload)
                        .encode();
                    let sequence = self.transport.next_sequence();
                    if let Err(e) =
                        self.transport
                            .send(client, MessageKind::Notify, sequence, &record)
                    {
                        log::debug!(
                            "dropping notify for {} to {}: {}",
                            batch.name,
                            client.identity(),
                            e
                        );
                    }
                }
            }
        }
    }
}

// ============================================================================
// Dispatch-thread handlers
// ============================================================================

impl PoolInner {
    /// Server side: serve one request, replying whenever the caller asked.
    fn handle_request(&self, sender: &ClientRef, header: &PackageHeader, body: &[u8]) {
        let request = match RequestView::parse(body) {
            Ok(request) => request,
            Err(e) => {
                log::warn!(
                    "dropping malformed request from {}: {}",
                    sender.identity(),
                    e
                );
                return;
            }
        };

        let (result, payload) = match self.serve(sender, &request) {
            Ok(payload) => (ResultCode::Ok, payload),
            Err(e) => (ResultCode::from(&e), None),
        };

        if !request.need_reply {
            return;
        }

        let mut builder = RecordBuilder::new();
        if let Some(name) = request.record.name() {
            builder = builder.name(name);
        }
        if let Some(ref bytes) = payload {
            builder = builder.payload(bytes);
        }
        let reply = encode_reply(result, &builder.encode());
        if let Err(e) = self
            .transport
            .send(sender, MessageKind::Reply, header.sequence, &reply)
        {
            log::warn!("failed to reply to {}: {}", sender.identity(), e);
        }
    }

    fn serve(&self, sender: &ClientRef, request: &RequestView<'_>) -> Result<Option<Vec<u8>>> {
        if !self.is_server() {
            return Err(Error::Unsupported);
        }
        let name = request
            .record
            .name()
            .ok_or(Error::InvalidArgument("element name missing"))?;
        let (global, persistent) = request
            .record
            .scope()
            .ok_or(Error::InvalidArgument("element scope missing"))?;

        let pond = if global {
            Arc::clone(self.global_pond())
        } else {
            self.directory().get_or_create(sender.identity())
        };

        match request.action {
            Action::Store(StoreAction::Create) => {
                pond.create(name, persistent, Some(sender.identity()))?;
                Ok(None)
            }
            Action::Store(StoreAction::Get) | Action::Store(StoreAction::CheckExists) => {
                if pond.exists(name) {
                    Ok(None)
                } else {
                    Err(Error::NotFound)
                }
            }
            Action::Store(StoreAction::Remove) => {
                pond.remove(name, Some(sender.identity()))?;
                Ok(None)
            }
            Action::Element(ElementAction::GetData) => Ok(Some(pond.get_value(name)?)),
            Action::Element(ElementAction::SetData) => {
                let bytes = request
                    .record
                    .payload()
                    .ok_or(Error::InvalidArgument("payload missing"))?;
                pond.set_value(name, bytes)?;
                Ok(None)
            }
            Action::Element(ElementAction::Notify) => {
                let batch = pond.notify(name, request.record.payload())?;
                self.deliver(batch);
                Ok(None)
            }
            Action::Element(ElementAction::AddListener) => {
                let token = request
                    .record
                    .listener()
                    .ok_or(Error::InvalidArgument("listener token missing"))?;
                pond.add_listener(name, token, ListenerTarget::Remote(sender.clone()))?;
                Ok(None)
            }
            Action::Element(ElementAction::RemoveListener) => {
                let token = request
                    .record
                    .listener()
                    .ok_or(Error::InvalidArgument("listener token missing"))?;
                pond.remove_listener(name, token)?;
                Ok(None)
            }
        }
    }

    /// Client side: complete the pending call this reply correlates with.
    fn handle_reply(&self, header: &PackageHeader, body: &[u8]) {
        if !self.pending.complete(header.sequence, body.to_vec()) {
            // Benign race: the caller timed out before the reply landed.
            log::debug!("dropping late reply for sequence {}", header.sequence);
        }
    }

    /// Client side: dispatch a notification to the registered callback.
    fn handle_notify(&self, body: &[u8]) {
        let record = match RecordView::parse(body) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("dropping malformed notify: {}", e);
                return;
            }
        };
        let Some(token) = record.listener() else {
            log::warn!("dropping notify without a listener token");
            return;
        };

        let callback = self.callbacks.lock().get(&token).cloned();
        match callback {
            // Invoked outside the table lock so a callback may re-enter the
            // store.
            Some(callback) => callback(record.payload().unwrap_or(&[])),
            None => log::debug!("dropping notify for unregistered token {}", token),
        }
    }
}
