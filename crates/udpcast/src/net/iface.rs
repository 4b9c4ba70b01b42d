// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interface catalog: a snapshot of active IPv4 network interfaces.
//!
//! The catalog is built once and never refreshed behind the caller's back;
//! rebuild it when the topology may have changed. An empty catalog is a
//! valid result and means "no usable interfaces", not an error.
//!
//! # Environment Variable
//!
//! `UDPCAST_MULTICAST_IF=<ipv4>` - force the multicast send interface,
//! bypassing catalog lookup (testing/debugging).

use std::net::Ipv4Addr;

/// One IPv4 address entry on an interface, with its subnet broadcast
/// address derived from the prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceAddr {
    /// The interface address.
    pub addr: Ipv4Addr,
    /// Subnet broadcast address (`addr | !netmask`).
    pub broadcast: Ipv4Addr,
}

/// Immutable snapshot of one network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// OS interface name (e.g. "eth0", "en0").
    pub name: String,
    /// Whether the interface was administratively up at snapshot time.
    pub is_up: bool,
    /// Whether the interface advertises multicast capability.
    pub supports_multicast: bool,
    /// IPv4 address entries in enumeration order.
    pub ipv4: Vec<IfaceAddr>,
}

impl NetworkInterface {
    /// First IPv4 address of the interface, used when a single address is
    /// needed to identify it to the OS (multicast join, send interface).
    #[must_use]
    pub fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.first().map(|entry| entry.addr)
    }
}

/// Ordered snapshot of the administratively-up interfaces.
#[derive(Debug, Clone, Default)]
pub struct InterfaceCatalog {
    interfaces: Vec<NetworkInterface>,
}

impl InterfaceCatalog {
    /// Enumerate active interfaces and their IPv4 addresses.
    ///
    /// Interfaces that are down are filtered out; interfaces without IPv4
    /// addresses are kept (they can still be named for a join, the OS then
    /// rejects it).
    #[must_use]
    pub fn build() -> Self {
        let mut interfaces = Vec::new();
        for iface in netdev::get_interfaces() {
            if !iface.is_up() {
                continue;
            }
            let ipv4: Vec<IfaceAddr> = iface
                .ipv4
                .iter()
                .map(|net| IfaceAddr {
                    addr: net.addr(),
                    broadcast: subnet_broadcast(net.addr(), net.prefix_len()),
                })
                .collect();
            let supports_multicast = iface.is_multicast();
            log::debug!(
                "[IFACE] {} up multicast={} addrs={}",
                iface.name,
                supports_multicast,
                ipv4.len()
            );
            interfaces.push(NetworkInterface {
                name: iface.name,
                is_up: true,
                supports_multicast,
                ipv4,
            });
        }
        Self { interfaces }
    }

    /// Build a catalog from an explicit interface list (simulation, tests).
    #[must_use]
    pub fn from_snapshot(interfaces: Vec<NetworkInterface>) -> Self {
        Self { interfaces }
    }

    /// The interfaces in enumeration order.
    #[must_use]
    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    /// Resolve an interface by OS name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    /// Whether `addr` equals the subnet broadcast address of any interface
    /// in the catalog.
    #[must_use]
    pub fn is_subnet_broadcast(&self, addr: Ipv4Addr) -> bool {
        self.interfaces
            .iter()
            .any(|iface| iface.ipv4.iter().any(|entry| entry.broadcast == addr))
    }
}

/// `UDPCAST_MULTICAST_IF` override for the multicast send interface.
#[must_use]
pub fn send_interface_override() -> Option<Ipv4Addr> {
    let raw = std::env::var("UDPCAST_MULTICAST_IF").ok()?;
    match raw.parse::<Ipv4Addr>() {
        Ok(addr) => {
            log::debug!("[IFACE] UDPCAST_MULTICAST_IF override: {}", addr);
            Some(addr)
        }
        Err(_) => {
            log::debug!("[IFACE] invalid UDPCAST_MULTICAST_IF='{}', ignoring", raw);
            None
        }
    }
}

/// Subnet broadcast address for `addr` under the given prefix length.
fn subnet_broadcast(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let mask = prefix_to_netmask(prefix_len);
    Ipv4Addr::from(u32::from(addr) | !u32::from(mask))
}

fn prefix_to_netmask(prefix_len: u8) -> Ipv4Addr {
    if prefix_len >= 32 {
        Ipv4Addr::new(255, 255, 255, 255)
    } else if prefix_len == 0 {
        Ipv4Addr::new(0, 0, 0, 0)
    } else {
        let mask = !((1u32 << (32 - prefix_len)) - 1);
        Ipv4Addr::from(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn lan_interface() -> NetworkInterface {
        NetworkInterface {
            name: "eth0".to_string(),
            is_up: true,
            supports_multicast: true,
            ipv4: vec![IfaceAddr {
                addr: Ipv4Addr::new(192, 168, 1, 10),
                broadcast: Ipv4Addr::new(192, 168, 1, 255),
            }],
        }
    }

    #[test]
    fn test_subnet_broadcast_slash_24() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(192, 168, 1, 10), 24),
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    #[test]
    fn test_subnet_broadcast_slash_16() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 20, 30, 40), 16),
            Ipv4Addr::new(10, 20, 255, 255)
        );
    }

    #[test]
    fn test_subnet_broadcast_host_route() {
        // /32: the broadcast collapses onto the address itself
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 0, 0, 1), 32),
            Ipv4Addr::new(10, 0, 0, 1)
        );
    }

    #[test]
    fn test_catalog_lookup_by_name() {
        let catalog = InterfaceCatalog::from_snapshot(vec![lan_interface()]);
        assert!(catalog.find("eth0").is_some());
        assert!(catalog.find("eth1").is_none());
    }

    #[test]
    fn test_catalog_subnet_broadcast_membership() {
        let catalog = InterfaceCatalog::from_snapshot(vec![lan_interface()]);
        assert!(catalog.is_subnet_broadcast(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(!catalog.is_subnet_broadcast(Ipv4Addr::new(192, 168, 2, 255)));
    }

    #[test]
    fn test_build_filters_to_up_interfaces() {
        // Can't assert topology in CI; the invariant is that nothing down
        // survives the filter.
        let catalog = InterfaceCatalog::build();
        assert!(catalog.interfaces().iter().all(|iface| iface.is_up));
    }
}
