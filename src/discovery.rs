//! Device discovery: multicast probes, unicast probes, subnet sweep and the
//! registry of devices they uncover.

use crate::{
    device::{DeviceClass, DeviceRecord, DeviceType},
    emeter::EmeterPacket,
    error::Error,
    inverter::{CommandId, InverterPacket},
    localhost::LocalHost,
    packet::{SpeedwireFrame, TAG_DATA2, TAG_DISCOVERY, TAG_IP_ADDRESS, data2},
    socket::{self, SocketFactory, SocketKind},
    MULTICAST_GROUP, SPEEDWIRE_PORT,
};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// The 20 byte multicast discovery request: group `0xFFFFFFFF`, an empty
/// discovery tag and the end-of-data terminator.
pub const MULTICAST_REQUEST: [u8; 20] = [
    0x53, 0x4d, 0x41, 0x00, 0x00, 0x04, 0x02, 0xa0, 0xff, 0xff, 0xff, 0xff, // signature, group
    0x00, 0x00, 0x00, 0x20, // discovery tag
    0x00, 0x00, 0x00, 0x00, // end of data
];

/// The 58 byte unicast discovery request: an inverter protocol probe with
/// command `0x00000200` to the broadcast device address.
pub const UNICAST_REQUEST: [u8; 58] = [
    0x53, 0x4d, 0x41, 0x00, 0x00, 0x04, 0x02, 0xa0, // signature, group tag
    0x00, 0x00, 0x00, 0x01, 0x00, 0x26, 0x00, 0x10, // group 1, data2 tag
    0x60, 0x65, 0x09, 0xa0, 0xff, 0xff, 0xff, 0xff, // protocol, words, ctrl, dst
    0xff, 0xff, 0x00, 0x00, 0x7d, 0x00, 0x52, 0xbe, // dst ctrl, src susy, serial
    0x28, 0x3a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // src ctrl, error, fragment
    0x01, 0x80, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, // packet id, command, first
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // last, end of data
    0x00, 0x00,
];

/// Classifier over a Speedwire frame deciding which discovery exchange it
/// belongs to.
#[derive(Debug, Copy, Clone)]
pub struct DiscoveryPacket<'a> {
    frame: SpeedwireFrame<'a>,
}

impl<'a> DiscoveryPacket<'a> {
    /// Wrap a parsed frame.
    pub fn new(frame: SpeedwireFrame<'a>) -> Self {
        Self { frame }
    }

    fn has_tag(&self, id: u16) -> bool {
        self.frame.find_tag(id).is_some()
    }

    /// `true` for a multicast discovery request: a discovery tag but neither
    /// Data2 nor ip address tags.
    pub fn is_multicast_request(&self) -> bool {
        self.has_tag(TAG_DISCOVERY) && !self.has_tag(TAG_DATA2) && !self.has_tag(TAG_IP_ADDRESS)
    }

    /// `true` for a multicast discovery response: discovery, Data2 and ip
    /// address tags all present.
    pub fn is_multicast_response(&self) -> bool {
        self.has_tag(TAG_DISCOVERY) && self.has_tag(TAG_DATA2) && self.has_tag(TAG_IP_ADDRESS)
    }

    /// `true` for either discovery exchange over the multicast tag set.
    pub fn is_discovery(&self) -> bool {
        self.is_multicast_request() || self.is_multicast_response()
    }

    fn unicast_command(&self) -> Option<u32> {
        let data2 = self.frame.data2().ok()?;
        if data2.protocol_id() != data2::PROTOCOL_INVERTER {
            return None;
        }
        let inverter = InverterPacket::parse(&data2).ok()?;
        if inverter.first_register_id() != 0 || inverter.last_register_id() != 0 {
            return None;
        }
        Some(inverter.command_id())
    }

    /// `true` for a unicast discovery probe, including the ones this library
    /// sends itself.
    pub fn is_unicast_request(&self) -> bool {
        self.frame.as_bytes().len() == UNICAST_REQUEST.len()
            && self.unicast_command() == Some(CommandId::Discovery.code())
    }

    /// `true` for the answer to a unicast discovery probe.
    pub fn is_unicast_response(&self) -> bool {
        self.unicast_command() == Some(CommandId::DiscoveryResponse.code())
    }

    /// The device ip address carried in the `0x0030` tag of multicast
    /// discovery responses.
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        let tag = self.frame.find_tag(TAG_IP_ADDRESS)?;
        let ip: [u8; 4] = tag.payload.get(0..4)?.try_into().ok()?;
        Some(Ipv4Addr::from(ip))
    }
}

/// Result of registering a device record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The record was appended as a new device.
    New,
    /// A pre-registered record was promoted to a full one.
    Updated,
    /// A structurally equal record already existed.
    Known,
}

/// The registry of known devices and the procedure that populates it.
#[derive(Debug, Default)]
pub struct Discovery {
    devices: Vec<DeviceRecord>,
}

impl Discovery {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All registered devices in registration order.
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Add a record carrying only the device ip, unless a record with that
    /// ip already exists. Pre-registered devices are probed directly during
    /// discovery, which finds devices that do not answer multicast.
    pub fn pre_register(&mut self, peer_ip: Ipv4Addr) -> bool {
        if self.devices.iter().any(|d| d.peer_ip == peer_ip) {
            return false;
        }

        self.devices.push(DeviceRecord::pre_registered(peer_ip));
        true
    }

    /// Add a fully known record, promoting a pre-registered record with the
    /// same ip if there is one.
    pub fn register(&mut self, record: DeviceRecord) -> RegisterOutcome {
        for device in &mut self.devices {
            if device.is_pre_registered() && device.peer_ip == record.peer_ip {
                *device = record;
                return RegisterOutcome::Updated;
            }
            if device.is_fully_registered() && device.same_device(&record) {
                return RegisterOutcome::Known;
            }
        }

        self.devices.push(record);
        RegisterOutcome::New
    }

    /// Remove all records structurally equal to the given one.
    pub fn unregister(&mut self, record: &DeviceRecord) {
        self.devices.retain(|d| d != record);
    }

    /// Probe the attached networks for devices.
    ///
    /// Sends the multicast request on every interface, the unicast request to
    /// every pre-registered ip on every interface, and finally sweeps every
    /// host of each interface's subnet with unicast requests. The sweep
    /// assumes a /24 netmask regardless of the configured prefix length.
    /// Reception continues until nothing has been sent or received for two
    /// seconds. Returns the number of devices newly registered or promoted.
    pub fn discover(
        &mut self,
        localhost: &LocalHost,
        factory: &SocketFactory,
    ) -> Result<usize, Error> {
        const IDLE_STOP_MS: u64 = 2000;
        const POLL_TIMEOUT_MS: i32 = 10;

        let local_ips = localhost.local_ipv4_addresses();
        let recv_sockets = factory.recv_sockets(SocketKind::ANYCAST, &local_ips);

        let mut sender = SweepSender::new(self, &local_ips);
        let mut found = 0usize;
        let mut last_activity = localhost.tick_count_ms();

        loop {
            // Pace the probes: a small batch per poll interval keeps the
            // kernel send queues and the devices happy.
            for _ in 0..10 {
                if sender.send_next(factory) {
                    last_activity = localhost.tick_count_ms();
                } else {
                    break;
                }
            }

            let ready = socket::poll_sockets(&recv_sockets, POLL_TIMEOUT_MS)?;

            for index in ready {
                let mut buf = [0u8; 2048];
                let Ok(Some((n, src))) = recv_sockets[index].try_recv_from(&mut buf) else {
                    continue;
                };

                if let Some(record) = self.classify(&buf[..n], src, localhost) {
                    match self.register(record) {
                        RegisterOutcome::New | RegisterOutcome::Updated => {
                            found += 1;
                        }
                        RegisterOutcome::Known => {}
                    }
                }
                last_activity = localhost.tick_count_ms();
            }

            if localhost.tick_count_ms().saturating_sub(last_activity) >= IDLE_STOP_MS {
                break;
            }
        }

        Ok(found)
    }

    /// Build a device record from an inbound packet, if it identifies one.
    pub fn classify(
        &self,
        buf: &[u8],
        src: SocketAddr,
        localhost: &LocalHost,
    ) -> Option<DeviceRecord> {
        let SocketAddr::V4(src) = src else {
            return None;
        };
        let peer_ip = *src.ip();

        let frame = SpeedwireFrame::parse(buf).ok()?;
        let discovery = DiscoveryPacket::new(frame);

        if discovery.is_discovery() {
            // A multicast discovery response tells us the device ip but not
            // its identity; remember the ip so the unicast probe reaches it.
            if let Some(ip) = discovery.ipv4_address() {
                log::debug!("discovery response from {}", ip);
            }
            return None;
        }

        let data2 = frame.data2().ok()?;

        match data2.protocol_id() {
            data2::PROTOCOL_EMETER | data2::PROTOCOL_EXTENDED_EMETER => {
                let emeter = EmeterPacket::parse(&data2).ok()?;
                let susy_id = emeter.susy_id();

                Some(DeviceRecord {
                    address: crate::device::DeviceAddress::new(susy_id, emeter.serial_number()),
                    device_class: DeviceClass::Emeter,
                    device_type: DeviceType::from_susy_id(susy_id)
                        .map(|t| t.name.to_string())
                        .unwrap_or_else(|| "Emeter".to_string()),
                    peer_ip,
                    interface_ip: localhost
                        .matching_local_address(peer_ip)
                        .unwrap_or(Ipv4Addr::UNSPECIFIED),
                })
            }
            data2::PROTOCOL_INVERTER => {
                // Our own probes are multicast looped back to us; skip them.
                if buf == UNICAST_REQUEST.as_slice() {
                    return None;
                }

                let inverter = InverterPacket::parse(&data2).ok()?;
                let address = inverter.src_address();
                let known = DeviceType::from_susy_id(address.susy_id);

                Some(DeviceRecord {
                    address,
                    device_class: known
                        .map(|t| t.device_class)
                        .unwrap_or(DeviceClass::PvInverter),
                    device_type: known
                        .map(|t| t.name.to_string())
                        .unwrap_or_else(|| "Inverter".to_string()),
                    peer_ip,
                    interface_ip: localhost
                        .matching_local_address(peer_ip)
                        .unwrap_or(Ipv4Addr::UNSPECIFIED),
                })
            }
            other => {
                log::debug!("ignoring protocol {:#06x} from {}", other, peer_ip);
                None
            }
        }
    }
}

/// State machine pacing the outbound probe sequence: multicast requests
/// first, then unicast probes to pre-registered devices, then the subnet
/// sweep.
struct SweepSender {
    local_ips: Vec<Ipv4Addr>,
    prereg_ips: Vec<Ipv4Addr>,
    multicast_index: usize,
    prereg_index: usize,
    sweep_host: u8,
    sweep_interface: usize,
}

impl SweepSender {
    fn new(discovery: &Discovery, local_ips: &[Ipv4Addr]) -> Self {
        Self {
            local_ips: local_ips.to_vec(),
            prereg_ips: discovery
                .devices()
                .iter()
                .filter(|d| d.is_pre_registered())
                .map(|d| d.peer_ip)
                .collect(),
            multicast_index: 0,
            prereg_index: 0,
            sweep_host: 1,
            sweep_interface: 0,
        }
    }

    /// Send the next probe. Returns `false` once the sequence is exhausted.
    fn send_next(&mut self, factory: &SocketFactory) -> bool {
        let group = SocketAddrV4::new(MULTICAST_GROUP, SPEEDWIRE_PORT);

        if self.multicast_index < self.local_ips.len() {
            let interface = self.local_ips[self.multicast_index];
            self.multicast_index += 1;

            if let Some(socket) = factory.send_socket(SocketKind::MULTICAST, interface) {
                if let Err(e) = socket.send_to(&MULTICAST_REQUEST, group) {
                    log::warn!("multicast probe on {} failed: {}", interface, e);
                }
            }
            return true;
        }

        if self.prereg_index < self.local_ips.len() {
            let interface = self.local_ips[self.prereg_index];
            self.prereg_index += 1;

            if let Some(socket) = factory.send_socket(SocketKind::UNICAST, interface) {
                for peer in &self.prereg_ips {
                    let dest = SocketAddrV4::new(*peer, SPEEDWIRE_PORT);
                    if let Err(e) = socket.send_to(&UNICAST_REQUEST, dest) {
                        log::warn!("unicast probe to {} failed: {}", peer, e);
                    }
                }
            }
            return true;
        }

        // Subnet sweep. The /24 assumption is carried over unchanged even
        // though the interface knows its real prefix length.
        while self.sweep_interface < self.local_ips.len() {
            if self.sweep_host < 255 {
                let interface = self.local_ips[self.sweep_interface];
                let octets = interface.octets();
                let host = Ipv4Addr::new(octets[0], octets[1], octets[2], self.sweep_host);
                self.sweep_host += 1;

                if let Some(socket) = factory.send_socket(SocketKind::UNICAST, interface) {
                    let dest = SocketAddrV4::new(host, SPEEDWIRE_PORT);
                    if let Err(e) = socket.send_to(&UNICAST_REQUEST, dest) {
                        log::debug!("sweep probe to {} failed: {}", host, e);
                    }
                }
                return true;
            }

            self.sweep_host = 1;
            self.sweep_interface += 1;
        }

        false
    }
}
