//! Request/response client for the inverter protocol: login, logoff and
//! register queries, with token based reply correlation.

use crate::{
    SPEEDWIRE_PORT,
    config::LoginRole,
    device::{DeviceAddress, DeviceRecord},
    error::{AuthError, Error},
    inverter::{CommandId, InverterPacket, InverterRequest, RawRecord},
    packet::{SpeedwireFrame, data2::PROTOCOL_INVERTER},
    socket::{self, SocketFactory, SocketKind, SpeedwireSocket},
    time,
};
use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::{Duration, Instant},
};

/// Error code a device sends when the session is gone and a new login is
/// required.
const ERROR_NOT_AUTHENTICATED: u16 = 0x0017;

/// Error code a device sends for a rejected login password.
const ERROR_INVALID_PASSWORD: u16 = 0x0100;

/// Correlation record for one in-flight request.
///
/// Created when a request is sent; matched against inbound replies by
/// `(susy id, serial, packet id)`; removed on match or expiry.
#[derive(Debug, Clone)]
pub struct CommandToken {
    /// Address of the device the request went to.
    pub address: DeviceAddress,
    /// Packet id of the request.
    pub packet_id: u16,
    /// Ip the device will answer from.
    pub peer_ip: Ipv4Addr,
    /// Local interface the request went out of.
    pub interface_ip: Ipv4Addr,
    /// Command id of the request.
    pub command: u32,
    /// Send time, for expiry.
    pub created_at: Instant,
}

impl CommandToken {
    /// `true` if this token belongs to a login request.
    pub fn is_login(&self) -> bool {
        self.command == CommandId::Login.code()
    }
}

/// The set of outstanding command tokens.
#[derive(Debug, Default)]
pub struct TokenRepository {
    tokens: Vec<CommandToken>,
    /// Raised when any device reports a lost session. The main loop checks
    /// and clears this to re-authenticate before the next query round.
    pub needs_login: bool,
}

impl TokenRepository {
    /// Append a token, returning its index.
    pub fn add(&mut self, token: CommandToken) -> usize {
        self.tokens.push(token);
        self.tokens.len() - 1
    }

    /// Index of the token matching a reply's source address and packet id.
    pub fn find(&self, address: DeviceAddress, packet_id: u16) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| t.address == address && t.packet_id == packet_id)
    }

    /// Token at `index`.
    pub fn at(&self, index: usize) -> &CommandToken {
        &self.tokens[index]
    }

    /// Remove the token at `index`.
    pub fn remove(&mut self, index: usize) -> CommandToken {
        self.tokens.remove(index)
    }

    /// Drop every token older than `max_age`. Returns how many were dropped.
    pub fn expire(&mut self, max_age: Duration) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|t| t.created_at.elapsed() < max_age);
        before - self.tokens.len()
    }

    /// Number of outstanding tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// `true` when no tokens are outstanding.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Validate a reply packet against its token.
///
/// All of the following must hold, otherwise the packet is not the awaited
/// reply and the caller keeps waiting: valid framing, inverter protocol id
/// with a consistent sub-layout, destination is us or broadcast, source
/// matches the token's device, packet ids are equal, and the packet really
/// arrived from the device's ip and port 9522.
pub fn check_reply<'a>(
    buf: &'a [u8],
    src: SocketAddr,
    token: &CommandToken,
) -> Option<InverterPacket<'a>> {
    let SocketAddr::V4(src) = src else {
        return None;
    };

    let frame = SpeedwireFrame::parse(buf).ok()?;
    let data2 = frame.data2().ok()?;

    if data2.protocol_id() != PROTOCOL_INVERTER {
        return None;
    }

    // The tag stream must be complete: tag payload, the 16 bytes of framing
    // in front of it and the end-of-data terminator behind it.
    if usize::from(data2.tag_length()) + 20 > buf.len() {
        return None;
    }

    let packet = InverterPacket::parse(&data2).ok()?;

    let dst = packet.dst_address();
    if dst.susy_id != DeviceAddress::BROADCAST.susy_id && dst.susy_id != DeviceAddress::LOCAL.susy_id
    {
        return None;
    }
    if dst.serial_number != DeviceAddress::BROADCAST.serial_number
        && dst.serial_number != DeviceAddress::LOCAL.serial_number
    {
        return None;
    }

    if packet.src_address() != token.address {
        return None;
    }

    if packet.packet_id() != token.packet_id {
        return None;
    }

    if src.port() != SPEEDWIRE_PORT || *src.ip() != token.peer_ip {
        return None;
    }

    Some(packet)
}

/// Issues commands to inverters and correlates their replies.
pub struct Client {
    sockets: HashMap<Ipv4Addr, SpeedwireSocket>,
    packet_id: u16,
    tokens: TokenRepository,
}

impl Client {
    /// Create a client serving the given devices, borrowing one unicast
    /// socket per involved interface from the factory.
    pub fn new(factory: &SocketFactory, devices: &[DeviceRecord]) -> Self {
        let mut sockets = HashMap::new();

        for device in devices {
            let interface = device.interface_ip;
            if interface.is_unspecified() || sockets.contains_key(&interface) {
                continue;
            }

            if let Some(socket) = factory.recv_socket(SocketKind::UNICAST, interface) {
                sockets.insert(interface, socket.clone());
            } else {
                log::warn!("no unicast socket for interface {}", interface);
            }
        }

        Self {
            sockets,
            packet_id: 0x8001,
            tokens: TokenRepository::default(),
        }
    }

    /// The outstanding tokens, including the `needs_login` flag.
    pub fn tokens(&self) -> &TokenRepository {
        &self.tokens
    }

    /// Mutable access to the token repository, e.g. to sweep stale tokens
    /// with [`TokenRepository::expire`] or clear `needs_login` after a
    /// re-login.
    pub fn tokens_mut(&mut self) -> &mut TokenRepository {
        &mut self.tokens
    }

    /// The packet id the next request will carry. The top bit marks requests
    /// and is always set.
    pub fn current_packet_id(&self) -> u16 {
        self.packet_id
    }

    fn advance_packet_id(&mut self) {
        self.packet_id = self.packet_id.wrapping_add(1) | 0x8000;
    }

    fn socket_for(&self, interface: Ipv4Addr) -> Result<&SpeedwireSocket, Error> {
        self.sockets
            .get(&interface)
            .ok_or(Error::Config(crate::error::ConfigError::InvalidInterface(
                interface,
            )))
    }

    fn send_request(
        &mut self,
        peer: &DeviceRecord,
        request: &InverterRequest,
        command: u32,
    ) -> Result<usize, Error> {
        let socket = self.socket_for(peer.interface_ip)?;
        let dest = SocketAddrV4::new(peer.peer_ip, SPEEDWIRE_PORT);

        socket.send_to(&request.encode(), dest)?;

        let index = self.tokens.add(CommandToken {
            address: peer.address,
            packet_id: request.packet_id,
            peer_ip: peer.peer_ip,
            interface_ip: peer.interface_ip,
            command,
            created_at: Instant::now(),
        });

        self.advance_packet_id();

        Ok(index)
    }

    /// Send a login request to `peer`. Returns the token index to pass to
    /// [`wait_login`](Self::wait_login).
    pub fn send_login(
        &mut self,
        peer: &DeviceRecord,
        role: LoginRole,
        password: &str,
        epoch_ms: u64,
    ) -> Result<usize, Error> {
        let request = InverterRequest::login(
            peer.address,
            self.packet_id,
            role,
            password,
            time::inverter_now(epoch_ms),
        );

        log::debug!("login to {} as {:?}", peer.address, role);

        self.send_request(peer, &request, CommandId::Login.code())
    }

    /// Wait for the reply to a previously sent login request.
    ///
    /// Unrelated packets arriving in between (emeter multicasts, stray
    /// replies) are skipped. On timeout the token stays in the repository;
    /// it is reaped by [`TokenRepository::expire`].
    pub fn wait_login(&mut self, token_index: usize, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;

        loop {
            let token = self.tokens.at(token_index).clone();
            let socket = self.socket_for(token.interface_ip)?.clone();

            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| {
                !r.is_zero()
            }) else {
                return Err(Error::Timeout);
            };

            let ready =
                socket::poll_sockets(std::slice::from_ref(&socket), remaining.as_millis() as i32)?;
            if ready.is_empty() {
                return Err(Error::Timeout);
            }

            let mut buf = [0u8; 2048];
            let Some((n, src)) = socket.try_recv_from(&mut buf)? else {
                continue;
            };

            let Some(reply) = check_reply(&buf[..n], src, &token) else {
                continue;
            };

            let result = self.interpret_error_code(reply.error_code(), true);
            self.tokens.remove(token_index);
            return result;
        }
    }

    /// Login to a device: send the request and wait for the acknowledgment.
    pub fn login(
        &mut self,
        peer: &DeviceRecord,
        role: LoginRole,
        password: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        let token_index =
            self.send_login(peer, role, password, crate::localhost::LocalHost::unix_epoch_ms())?;
        self.wait_login(token_index, timeout)
    }

    /// Login to every device in `devices`. Succeeds only if every peer
    /// acknowledges; the first failure aborts the round.
    pub fn login_all(
        &mut self,
        devices: &[DeviceRecord],
        role: LoginRole,
        password: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        for device in devices.iter().filter(|d| d.is_fully_registered()) {
            self.login(device, role, password, timeout)?;
        }

        Ok(())
    }

    /// Send a logoff to `peer`. Fire and forget: devices do not answer
    /// logoff, so no token is created.
    pub fn logoff(&mut self, peer: &DeviceRecord) -> Result<(), Error> {
        let request = InverterRequest::logoff(self.packet_id);

        let socket = self.socket_for(peer.interface_ip)?;
        socket.send_to(
            &request.encode(),
            SocketAddrV4::new(peer.peer_ip, SPEEDWIRE_PORT),
        )?;

        self.advance_packet_id();

        Ok(())
    }

    /// Query an inclusive register range from `peer` and decode the reply
    /// records.
    pub fn query(
        &mut self,
        peer: &DeviceRecord,
        command: CommandId,
        first_register_id: u32,
        last_register_id: u32,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, Error> {
        let request = InverterRequest::query(
            peer.address,
            self.packet_id,
            command,
            first_register_id,
            last_register_id,
        );

        let token_index = self.send_request(peer, &request, command.code())?;
        let deadline = Instant::now() + timeout;

        loop {
            let token = self.tokens.at(token_index).clone();
            let socket = self.socket_for(token.interface_ip)?.clone();

            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| {
                !r.is_zero()
            }) else {
                self.tokens.remove(token_index);
                return Err(Error::Timeout);
            };

            let ready =
                socket::poll_sockets(std::slice::from_ref(&socket), remaining.as_millis() as i32)?;
            if ready.is_empty() {
                self.tokens.remove(token_index);
                return Err(Error::Timeout);
            }

            let mut buf = [0u8; 2048];
            let Some((n, src)) = socket.try_recv_from(&mut buf)? else {
                continue;
            };

            let Some(reply) = check_reply(&buf[..n], src, &token) else {
                continue;
            };

            let result = self.process_query_reply(&reply);
            self.tokens.remove(token_index);
            return result;
        }
    }

    /// Interpret the reply to a query: map the error code, then decode all
    /// records.
    fn process_query_reply(&mut self, reply: &InverterPacket<'_>) -> Result<Vec<RawRecord>, Error> {
        self.interpret_error_code(reply.error_code(), false)?;

        Ok(reply.records()?.collect())
    }

    /// Map a reply error code to a result, raising `needs_login` for lost
    /// sessions.
    fn interpret_error_code(&mut self, code: u16, is_login: bool) -> Result<(), Error> {
        match code {
            0 => Ok(()),
            ERROR_NOT_AUTHENTICATED => {
                self.tokens.needs_login = true;
                Err(AuthError::NotAuthenticated.into())
            }
            ERROR_INVALID_PASSWORD if is_login => Err(AuthError::InvalidPassword.into()),
            other => Err(AuthError::LoginFailure(other).into()),
        }
    }
}
