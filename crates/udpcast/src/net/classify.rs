// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Semantic address classification for live input validation.
//!
//! Classification is first-match-wins in a fixed order:
//!
//! ```text
//! Broadcast -> Multicast -> Loopback -> Invalid -> LocalBroadcast -> Global -> Unknown
//! ```
//!
//! The order matters: a subnet broadcast address (e.g. 192.168.1.255 on a
//! /24) is also a routable unicast address, so interface-derived broadcast
//! addresses must be checked before the generic global fallback.

use crate::net::iface::InterfaceCatalog;
use std::fmt;
use std::net::Ipv4Addr;

/// Semantic class of a destination/bind address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// The limited broadcast address 255.255.255.255.
    Broadcast,
    /// A group address in 224.0.0.0/4.
    Multicast,
    /// 127.0.0.0/8.
    Loopback,
    /// The subnet broadcast address of an interface in the catalog.
    LocalBroadcast,
    /// Routable unicast.
    Global,
    /// Unparsable or empty input.
    Invalid,
    /// Fallback (e.g. 0.0.0.0); renders as an empty label.
    Unknown,
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AddressClass::Broadcast => "broadcast",
            AddressClass::Multicast => "multicast",
            AddressClass::Loopback => "loopback",
            AddressClass::LocalBroadcast => "local broadcast",
            AddressClass::Global => "global",
            AddressClass::Invalid => "invalid",
            AddressClass::Unknown => "",
        };
        f.write_str(label)
    }
}

/// Classify a textual address against the interface catalog.
#[must_use]
pub fn classify(text: &str, catalog: &InterfaceCatalog) -> AddressClass {
    let Ok(addr) = text.trim().parse::<Ipv4Addr>() else {
        return AddressClass::Invalid;
    };
    if addr == Ipv4Addr::BROADCAST {
        AddressClass::Broadcast
    } else if addr.is_multicast() {
        AddressClass::Multicast
    } else if addr.is_loopback() {
        AddressClass::Loopback
    } else if catalog.is_subnet_broadcast(addr) {
        AddressClass::LocalBroadcast
    } else if !addr.is_unspecified() {
        AddressClass::Global
    } else {
        AddressClass::Unknown
    }
}
