//! UDP sockets bound to specific interfaces, and the factory that decides
//! how many of them to open.

use crate::{
    MULTICAST_GROUP, SPEEDWIRE_PORT,
    config::SocketStrategy,
    error::{ConfigError, TransportError},
    localhost::LocalHost,
};
use std::{
    io,
    mem::size_of,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
    os::fd::{AsRawFd, FromRawFd, RawFd},
    sync::Arc,
};

bitflags::bitflags! {
    /// Traffic directions a factory socket serves.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SocketDirection: u8 {
        /// Outbound traffic.
        const SEND = 0x1;
        /// Inbound traffic.
        const RECV = 0x2;
    }
}

bitflags::bitflags! {
    /// Cast kinds a factory socket serves.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SocketKind: u8 {
        /// Unicast traffic on the ephemeral port.
        const UNICAST = 0x1;
        /// Multicast group traffic on port 9522.
        const MULTICAST = 0x2;
        /// Both.
        const ANYCAST = 0x3;
    }
}

/// A UDP socket bound to one local interface.
///
/// Handles are cheap clones sharing one file descriptor; the descriptor is
/// closed when the last handle is dropped. Sockets are non-blocking and not
/// reentrant across threads.
#[derive(Debug, Clone)]
pub struct SpeedwireSocket {
    inner: Arc<UdpSocket>,
    interface: Ipv4Addr,
    multicast: bool,
}

impl SpeedwireSocket {
    /// Open a socket on the given interface address.
    ///
    /// Multicast sockets bind to port 9522 on the wildcard address with
    /// `SO_REUSEADDR`/`SO_REUSEPORT` so several processes can listen, and
    /// join the Speedwire group on `interface`, or on every local interface
    /// when `interface` is the wildcard address, since a wildcard membership
    /// only covers the default route's NIC. Unicast sockets bind to an
    /// ephemeral port on the interface address itself, which also pins the
    /// source address of outbound packets.
    pub fn open(
        localhost: &LocalHost,
        interface: Ipv4Addr,
        multicast: bool,
    ) -> Result<Self, ConfigError> {
        let bind_addr = if multicast {
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SPEEDWIRE_PORT)
        } else {
            SocketAddrV4::new(interface, 0)
        };

        let socket = open_reusable(bind_addr).map_err(|e| ConfigError::SocketSetup(e.kind()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ConfigError::SocketSetup(e.kind()))?;

        if multicast {
            socket
                .set_multicast_ttl_v4(1)
                .map_err(|e| ConfigError::SocketSetup(e.kind()))?;
            socket
                .set_multicast_loop_v4(true)
                .map_err(|e| ConfigError::SocketSetup(e.kind()))?;

            if interface.is_unspecified() {
                for local in localhost.local_ipv4_addresses() {
                    if let Err(e) = socket.join_multicast_v4(&MULTICAST_GROUP, &local) {
                        log::warn!("joining {} on {} failed: {}", MULTICAST_GROUP, local, e);
                    }
                }
            } else {
                socket
                    .join_multicast_v4(&MULTICAST_GROUP, &interface)
                    .map_err(|e| ConfigError::SocketSetup(e.kind()))?;
            }
        }

        Ok(Self {
            inner: Arc::new(socket),
            interface,
            multicast,
        })
    }

    /// The interface address this socket is bound to; the wildcard address
    /// for shared sockets.
    pub fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    /// `true` if this socket is a member of the Speedwire multicast group.
    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Send a datagram.
    ///
    /// For multicast destinations the egress interface is pinned to this
    /// socket's interface first. An unreachable network is logged and
    /// reported as a zero byte send; it is a transient condition during
    /// interface setup and must not abort a sweep over other interfaces.
    pub fn send_to(&self, buf: &[u8], dest: SocketAddrV4) -> Result<usize, TransportError> {
        if dest.ip().is_multicast() && !self.interface.is_unspecified() {
            set_multicast_interface(self.inner.as_raw_fd(), self.interface)
                .map_err(TransportError::from)?;
        }

        match self.inner.send_to(buf, SocketAddr::V4(dest)) {
            Ok(n) => Ok(n),
            Err(e) if e.raw_os_error() == Some(libc::ENETUNREACH) => {
                log::warn!("{} unreachable from {}", dest, self.interface);
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Receive a datagram without blocking. Returns `None` when nothing is
    /// queued.
    pub fn try_recv_from(
        &self,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.inner.recv_from(buf) {
            Ok((n, src)) => Ok(Some((n, src))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl AsRawFd for SpeedwireSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Wait for any of the given sockets to become readable.
///
/// Returns the indices of the readable sockets; an empty vector on timeout.
pub fn poll_sockets(sockets: &[SpeedwireSocket], timeout_ms: i32) -> io::Result<Vec<usize>> {
    let mut fds: Vec<libc::pollfd> = sockets
        .iter()
        .map(|socket| libc::pollfd {
            fd: socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fds
        .iter()
        .enumerate()
        .filter(|(_, fd)| fd.revents & libc::POLLIN != 0)
        .map(|(i, _)| i)
        .collect())
}

/// Create a UDP socket with `SO_REUSEADDR` and `SO_REUSEPORT` set before the
/// bind. The standard library only exposes these options after binding, which
/// is too late to share port 9522.
fn open_reusable(bind_addr: SocketAddrV4) -> io::Result<UdpSocket> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let enable: libc::c_int = 1;
        for option in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                (&enable as *const libc::c_int).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: bind_addr.port().to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from(*bind_addr.ip()).to_be(),
            },
            sin_zero: [0; 8],
        };

        if libc::bind(
            fd,
            (&addr as *const libc::sockaddr_in).cast(),
            size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(UdpSocket::from_raw_fd(fd))
    }
}

/// Pin the egress interface for multicast sends.
fn set_multicast_interface(fd: RawFd, interface: Ipv4Addr) -> io::Result<()> {
    let addr = libc::in_addr {
        s_addr: u32::from(interface).to_be(),
    };

    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            (&addr as *const libc::in_addr).cast(),
            size_of::<libc::in_addr>() as libc::socklen_t,
        )
    };

    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

struct SocketEntry {
    direction: SocketDirection,
    kind: SocketKind,
    interface: Ipv4Addr,
    socket: SpeedwireSocket,
}

/// Opens and hands out sockets according to the configured strategy.
///
/// An explicit context object: create one at startup and pass it to
/// discovery, the command client and the dispatcher.
pub struct SocketFactory {
    entries: Vec<SocketEntry>,
    strategy: SocketStrategy,
}

impl SocketFactory {
    /// Open the sockets demanded by `strategy`.
    pub fn new(localhost: &LocalHost, strategy: SocketStrategy) -> Result<Self, ConfigError> {
        let mut factory = Self {
            entries: Vec::new(),
            strategy,
        };

        let locals = localhost.local_ipv4_addresses();
        if locals.is_empty() {
            return Err(ConfigError::NoInterfaces);
        }

        match strategy {
            SocketStrategy::OneSocketPerInterface => {
                for interface in &locals {
                    factory.open(
                        localhost,
                        SocketDirection::SEND | SocketDirection::RECV,
                        SocketKind::ANYCAST,
                        *interface,
                    )?;
                }
            }
            SocketStrategy::OneSingleSocket => {
                factory.open(
                    localhost,
                    SocketDirection::SEND | SocketDirection::RECV,
                    SocketKind::ANYCAST,
                    Ipv4Addr::UNSPECIFIED,
                )?;
            }
            SocketStrategy::MulticastSingleAndUnicastPerInterface => {
                for interface in &locals {
                    factory.open(
                        localhost,
                        SocketDirection::SEND | SocketDirection::RECV,
                        SocketKind::UNICAST,
                        *interface,
                    )?;
                }
                factory.open(
                    localhost,
                    SocketDirection::SEND | SocketDirection::RECV,
                    SocketKind::ANYCAST,
                    Ipv4Addr::UNSPECIFIED,
                )?;
            }
            SocketStrategy::UnicastPerInterface => {
                for interface in &locals {
                    factory.open(
                        localhost,
                        SocketDirection::SEND | SocketDirection::RECV,
                        SocketKind::UNICAST,
                        *interface,
                    )?;
                }
            }
        }

        Ok(factory)
    }

    /// The strategy this factory was created with.
    pub fn strategy(&self) -> SocketStrategy {
        self.strategy
    }

    fn open(
        &mut self,
        localhost: &LocalHost,
        direction: SocketDirection,
        kind: SocketKind,
        interface: Ipv4Addr,
    ) -> Result<(), ConfigError> {
        let socket =
            SpeedwireSocket::open(localhost, interface, kind.contains(SocketKind::MULTICAST))?;

        self.entries.push(SocketEntry {
            direction,
            kind,
            interface,
            socket,
        });

        Ok(())
    }

    /// A socket for sending `kind` traffic out of the given interface.
    ///
    /// Falls back to a wildcard-bound socket when no interface specific one
    /// exists.
    pub fn send_socket(&self, kind: SocketKind, interface: Ipv4Addr) -> Option<&SpeedwireSocket> {
        if !interface.is_unspecified() {
            if let Some(entry) = self.entries.iter().find(|e| {
                e.direction.contains(SocketDirection::SEND)
                    && e.kind.contains(kind)
                    && e.interface == interface
            }) {
                return Some(&entry.socket);
            }
        }

        self.entries
            .iter()
            .find(|e| {
                e.direction.contains(SocketDirection::SEND)
                    && e.kind.contains(kind)
                    && e.interface.is_unspecified()
            })
            .map(|e| &e.socket)
    }

    /// A socket receiving `kind` traffic on the given interface.
    pub fn recv_socket(&self, kind: SocketKind, interface: Ipv4Addr) -> Option<&SpeedwireSocket> {
        if !interface.is_unspecified() {
            // Exact kind match first, then any socket on the interface that
            // serves at least part of the requested kind.
            if let Some(entry) = self.entries.iter().find(|e| {
                e.direction.contains(SocketDirection::RECV)
                    && e.kind.contains(kind)
                    && e.interface == interface
            }) {
                return Some(&entry.socket);
            }

            if let Some(entry) = self.entries.iter().find(|e| {
                e.direction.contains(SocketDirection::RECV)
                    && e.kind.intersects(kind)
                    && e.interface == interface
            }) {
                return Some(&entry.socket);
            }
        }

        self.entries
            .iter()
            .find(|e| {
                e.direction.contains(SocketDirection::RECV)
                    && e.kind.contains(kind)
                    && e.interface.is_unspecified()
            })
            .map(|e| &e.socket)
    }

    /// Sockets for receiving `kind` traffic on the given interfaces,
    /// deduplicated by file descriptor for use in one poll set.
    pub fn recv_sockets(&self, kind: SocketKind, interfaces: &[Ipv4Addr]) -> Vec<SpeedwireSocket> {
        let mut sockets: Vec<SpeedwireSocket> = Vec::new();

        // Under the shared multicast strategy all group traffic arrives on
        // the single wildcard socket.
        if kind == SocketKind::MULTICAST
            && self.strategy == SocketStrategy::MulticastSingleAndUnicastPerInterface
        {
            if let Some(socket) = self.recv_socket(SocketKind::MULTICAST, Ipv4Addr::UNSPECIFIED) {
                sockets.push(socket.clone());
            }
            return sockets;
        }

        for interface in interfaces {
            let Some(socket) = self.recv_socket(kind, *interface) else {
                continue;
            };

            if !sockets.iter().any(|s| s.as_raw_fd() == socket.as_raw_fd()) {
                sockets.push(socket.clone());
            }
        }

        // The shared wildcard socket is part of every poll set when present.
        if let Some(socket) = self
            .entries
            .iter()
            .find(|e| {
                e.direction.contains(SocketDirection::RECV)
                    && e.kind.intersects(kind)
                    && e.interface.is_unspecified()
            })
            .map(|e| &e.socket)
        {
            if !sockets.iter().any(|s| s.as_raw_fd() == socket.as_raw_fd()) {
                sockets.push(socket.clone());
            }
        }

        sockets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localhost::InterfaceInfo;

    fn loopback_host() -> LocalHost {
        LocalHost::with_interfaces(vec![InterfaceInfo {
            name: "lo".into(),
            index: 1,
            addresses: vec![(Ipv4Addr::LOCALHOST, 8)],
        }])
    }

    #[test]
    fn unicast_socket_binds_ephemeral() {
        let host = loopback_host();
        let socket = SpeedwireSocket::open(&host, Ipv4Addr::LOCALHOST, false).unwrap();

        let addr = socket.local_addr().unwrap();
        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
        assert_ne!(addr.port(), SPEEDWIRE_PORT);
    }

    #[test]
    fn loopback_send_and_receive() {
        let host = loopback_host();
        let tx = SpeedwireSocket::open(&host, Ipv4Addr::LOCALHOST, false).unwrap();
        let rx = SpeedwireSocket::open(&host, Ipv4Addr::LOCALHOST, false).unwrap();

        let SocketAddr::V4(dest) = rx.local_addr().unwrap() else {
            unreachable!();
        };

        assert!(rx.try_recv_from(&mut [0u8; 16]).unwrap().is_none());

        tx.send_to(b"ping", dest).unwrap();

        let ready = poll_sockets(std::slice::from_ref(&rx), 1000).unwrap();
        assert_eq!(ready, vec![0]);

        let mut buf = [0u8; 16];
        let (n, src) = rx.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(src, tx.local_addr().unwrap());
    }

    #[test]
    fn cloned_handles_share_the_descriptor() {
        let host = loopback_host();
        let socket = SpeedwireSocket::open(&host, Ipv4Addr::LOCALHOST, false).unwrap();
        let clone = socket.clone();

        assert_eq!(socket.as_raw_fd(), clone.as_raw_fd());
    }

    #[test]
    fn factory_hands_out_interface_sockets() {
        let host = loopback_host();
        let factory = SocketFactory::new(&host, SocketStrategy::UnicastPerInterface).unwrap();

        let socket = factory
            .send_socket(SocketKind::UNICAST, Ipv4Addr::LOCALHOST)
            .unwrap();
        assert_eq!(socket.interface(), Ipv4Addr::LOCALHOST);

        // No multicast socket under this strategy.
        assert!(
            factory
                .send_socket(SocketKind::MULTICAST, Ipv4Addr::LOCALHOST)
                .is_none()
        );

        let recv = factory.recv_sockets(SocketKind::ANYCAST, &[Ipv4Addr::LOCALHOST]);
        assert_eq!(recv.len(), 1);
    }
}
