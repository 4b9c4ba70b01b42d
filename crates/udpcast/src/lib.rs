// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # udpcast - UDP unicast/broadcast/multicast exerciser
//!
//! A diagnostic library for driving one UDP endpoint through its whole
//! lifecycle: bind with configurable address-sharing semantics, join a
//! multicast group on a specific interface, transmit periodically, and
//! decode incoming datagrams while classifying addresses against the local
//! interface set.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use udpcast::{SessionConfig, SessionController};
//! use std::time::Duration;
//!
//! let mut controller = SessionController::new(SessionConfig::default())
//!     .expect("poll creation should succeed");
//! let mut sink = udpcast::NullSink;
//!
//! controller.start(&mut sink);
//! while controller.is_running() {
//!     controller.pump(Duration::from_millis(200), &mut sink).unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                       Presentation layer                         |
//! |        (udpcastctl, or any other EventSink implementor)          |
//! +------------------------------------------------------------------+
//! |                      SessionController                           |
//! |   Stopped <-> Running | fresh UdpSession per cycle | mio Poll    |
//! +------------------------------------------------------------------+
//! |   PeriodicTransmitter        |          ReceiveLoop              |
//! |   deadline-driven send       |   backlog discard + drain         |
//! +------------------------------------------------------------------+
//! |                         UdpSession                               |
//! |   Unbound -> Bound -> Closed | join | send iface | loopback      |
//! +------------------------------------------------------------------+
//! |            InterfaceCatalog        AddressClassifier             |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Lifecycle rules
//!
//! A [`UdpSession`] is bound at most once. The multicast send interface and
//! group membership cannot be reverted on a live socket, so the controller
//! discards the session on stop and constructs a fresh one on the next
//! start. See [`net::session`] for the full set of ordering constraints.

/// Configuration snapshots (bind, join, send) and tunables.
pub mod config;
/// Received/sent datagram records and payload rendering.
pub mod datagram;
/// Error taxonomy for bind, join, and send operations.
pub mod error;
/// Session orchestration: controller, periodic transmitter, receive loop.
pub mod engine;
/// Interface catalog, address classification, and the socket session.
pub mod net;

pub use config::{BindConfig, MulticastJoinConfig, SendConfig, TtlConfig, MAX_DATAGRAM_SIZE};
pub use datagram::{Datagram, SendRecord};
pub use engine::controller::{SessionConfig, SessionController};
pub use engine::receiver::{DatagramSource, ReceiveLoop};
pub use engine::transmitter::PeriodicTransmitter;
pub use engine::{EventSink, NullSink};
pub use error::{BindError, JoinError, SendError};
pub use net::classify::{classify, AddressClass};
pub use net::iface::{IfaceAddr, InterfaceCatalog, NetworkInterface};
pub use net::session::{JoinOutcome, SessionState, UdpSession};
