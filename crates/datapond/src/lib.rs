// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Datapond - distributed named-value store with publish/subscribe
//!
//! Many client processes and one broker process share named byte values that
//! are process-local, globally visible, or durably scoped to an owning
//! client, with change notifications fanning out to local and remote
//! listeners and synchronous remote calls correlated by sequence number over
//! an asynchronous dispatch loop.
//!
//! ## Quick Start
//!
//! ```rust
//! use datapond::{DataPool, LoopbackHub, Result};
//!
//! fn main() -> Result<()> {
//!     let hub = LoopbackHub::new();
//!     let broker = DataPool::new(hub.server("broker")?)?;
//!     let pool = DataPool::new(hub.client("fusion-service")?)?;
//!
//!     // A globally visible element, stored on the broker.
//!     let signal = pool.create_element("crossing/signal", true, false)?;
//!     signal.set_data(b"RED")?;
//!     assert_eq!(signal.get_data()?, b"RED");
//!
//!     // A process-local ephemeral element.
//!     let speed = pool.create_element("vehicle/speed", false, false)?;
//!     speed.set_data(b"42")?;
//!     # drop(broker);
//!     Ok(())
//! }
//! ```
//!
//! ## Scope model
//!
//! | global | persistent | storage location                          |
//! |--------|------------|-------------------------------------------|
//! | true   | (ignored)  | global pond on the broker                 |
//! | false  | true       | per-owner pond on the broker              |
//! | false  | false      | the calling client's own ephemeral pond   |
//!
//! "Persistent" means the element's broker-side pond outlives the owning
//! client's *connection* - not the broker process. Nothing is written to
//! disk; a broker restart starts empty while clients' ephemeral elements are
//! unaffected.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                        Application Layer                         |
//! |            DataPool -> PoolElement (data + listeners)            |
//! +------------------------------------------------------------------+
//! |                          Store Layer                             |
//! |   Scope resolution | Ponds & Directory | Request Correlator      |
//! +------------------------------------------------------------------+
//! |                          Wire Layer                              |
//! |   Element records | Request/Reply/Notify | frame codec           |
//! +------------------------------------------------------------------+
//! |                        Transport Layer                           |
//! |          Loopback hub (in-process) | TCP client/broker           |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DataPool`] | Per-process store context, role bound at construction |
//! | [`PoolElement`] | Handle to one named value with listener management |
//! | [`Transport`] | Pluggable request/reply/notify carrier |
//! | [`LoopbackHub`] | In-process transport for tests and single-process use |
//! | [`TcpTransport`] | Client transport for a `datapond-broker` process |

/// Store and TCP client configuration.
pub mod config;
/// Request correlator pairing remote calls with blocking waits.
pub mod correlator;
/// Elements: named values with listener sets.
pub mod element;
/// Error taxonomy and wire result codes.
pub mod error;
/// Ponds and the server-side pond directory.
pub mod pond;
/// Request/Reply/Notify message bodies.
pub mod protocol;
/// Element record wire codec.
pub mod record;
/// The store facade.
pub mod store;
/// Transport trait and the bundled loopback/TCP implementations.
pub mod transport;

pub use config::{PoolConfig, TcpConfig};
pub use element::ListenerHandle;
pub use error::{Error, Result, ResultCode};
pub use store::{DataPool, PoolElement};
pub use transport::loopback::LoopbackHub;
pub use transport::tcp::TcpTransport;
pub use transport::{ClientRef, MessageKind, PackageHandler, PackageHeader, Role, Transport};

/// Datapond version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
