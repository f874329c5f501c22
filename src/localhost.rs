//! Platform neutral access to host name, clocks and local IPv4 interfaces.

use std::{
    net::Ipv4Addr,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// One local network interface with its IPv4 addresses.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// OS interface name, e.g. `eth0`.
    pub name: String,
    /// OS interface index.
    pub index: u32,
    /// IPv4 addresses assigned to the interface, with their prefix lengths.
    pub addresses: Vec<(Ipv4Addr, u32)>,
}

/// Cached snapshot of host information.
///
/// Enumerating interfaces is comparatively expensive, so the snapshot is
/// taken once at startup and passed by reference to everything that needs it.
#[derive(Debug, Clone)]
pub struct LocalHost {
    hostname: String,
    interfaces: Vec<InterfaceInfo>,
    started: Instant,
}

impl LocalHost {
    /// Query the operating system for hostname and interface information.
    pub fn query() -> Self {
        Self {
            hostname: query_hostname(),
            interfaces: query_interfaces(),
            started: Instant::now(),
        }
    }

    /// Build a snapshot from the given interface list. Used by tests and by
    /// callers that want to restrict operation to specific interfaces.
    pub fn with_interfaces(interfaces: Vec<InterfaceInfo>) -> Self {
        Self {
            hostname: query_hostname(),
            interfaces,
            started: Instant::now(),
        }
    }

    /// Cached host name.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// All cached interfaces.
    pub fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }

    /// All local IPv4 addresses, loopback excluded.
    pub fn local_ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        self.interfaces
            .iter()
            .flat_map(|itf| itf.addresses.iter().map(|(addr, _)| *addr))
            .filter(|addr| !addr.is_loopback())
            .collect()
    }

    /// OS interface index for a local address. Needed for IPv6 multicast
    /// membership.
    pub fn interface_index(&self, addr: Ipv4Addr) -> Option<u32> {
        self.interfaces
            .iter()
            .find(|itf| itf.addresses.iter().any(|(a, _)| *a == addr))
            .map(|itf| itf.index)
    }

    /// Network prefix length for a local address.
    pub fn prefix_length(&self, addr: Ipv4Addr) -> Option<u32> {
        self.interfaces
            .iter()
            .flat_map(|itf| itf.addresses.iter())
            .find(|(a, _)| *a == addr)
            .map(|(_, prefix)| *prefix)
    }

    /// The local address whose dotted string representation shares the
    /// longest common prefix with the peer address. Used to label discovered
    /// devices with the interface they were found on.
    pub fn matching_local_address(&self, peer: Ipv4Addr) -> Option<Ipv4Addr> {
        let peer = peer.to_string();

        self.local_ipv4_addresses()
            .into_iter()
            .max_by_key(|local| common_prefix_len(&local.to_string(), &peer))
    }

    /// Unix epoch time in milliseconds.
    pub fn unix_epoch_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Monotonic milliseconds since this snapshot was created.
    pub fn tick_count_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn query_hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn query_interfaces() -> Vec<InterfaceInfo> {
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();

    let Ok(addrs) = nix::ifaddrs::getifaddrs() else {
        return interfaces;
    };

    for ifaddr in addrs {
        let Some(addr) = ifaddr
            .address
            .as_ref()
            .and_then(|a| a.as_sockaddr_in())
            .map(|sin| sin.ip())
        else {
            continue;
        };

        let prefix = ifaddr
            .netmask
            .as_ref()
            .and_then(|m| m.as_sockaddr_in())
            .map(|sin| u32::from(sin.ip()).count_ones())
            .unwrap_or(32);

        let index = nix::net::if_::if_nametoindex(ifaddr.interface_name.as_str()).unwrap_or(0);

        match interfaces
            .iter_mut()
            .find(|itf| itf.name == ifaddr.interface_name)
        {
            Some(itf) => itf.addresses.push((addr, prefix)),
            None => interfaces.push(InterfaceInfo {
                name: ifaddr.interface_name,
                index,
                addresses: vec![(addr, prefix)],
            }),
        }
    }

    interfaces
}
