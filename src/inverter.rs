//! The inverter request/response protocol carried in Data2 payload `0x6065`.
//!
//! Unlike the rest of a Speedwire packet, everything behind the Data2 control
//! byte is little-endian.

use crate::{
    config::LoginRole,
    device::DeviceAddress,
    error::ProtocolError,
    packet::{FrameBuilder, data2::{Data2Packet, PROTOCOL_INVERTER}},
};
use speedwire_wire as wire;

const DST_SUSY_ID: usize = 0;
const DST_SERIAL_NUMBER: usize = 2;
const DST_CONTROL: usize = 6;
const SRC_SUSY_ID: usize = 8;
const SRC_SERIAL_NUMBER: usize = 10;
const SRC_CONTROL: usize = 14;
const ERROR_CODE: usize = 16;
const FRAGMENT_COUNTER: usize = 18;
const PACKET_ID: usize = 20;
const COMMAND_ID: usize = 22;
const FIRST_REGISTER_ID: usize = 26;
const LAST_REGISTER_ID: usize = 30;
const DATA: usize = 34;

/// Maximum record payload carried per register.
pub const MAX_RECORD_PAYLOAD: usize = 40;

/// Well known command ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u32)]
pub enum CommandId {
    /// Query AC-side measurement registers.
    AcQuery = 0x5100_0200,
    /// Query device and relay status registers.
    StatusQuery = 0x5180_0200,
    /// Query DC-side measurement registers.
    DcQuery = 0x5380_0200,
    /// Query energy counter registers.
    EnergyQuery = 0x5400_0200,
    /// Query device identity registers.
    DeviceQuery = 0x5800_0200,
    /// Login to a device.
    Login = 0xfffd_040c,
    /// Close the session on a device. No response is sent.
    Logoff = 0xfffd_01e0,
    /// Unicast device discovery probe.
    Discovery = 0x0000_0200,
    /// Response to a unicast discovery probe.
    DiscoveryResponse = 0x0000_0201,
}

impl CommandId {
    /// Raw command code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl core::fmt::Display for CommandId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandId::AcQuery => write!(f, "AC({:#010x})", self.code()),
            CommandId::StatusQuery => write!(f, "STATUS({:#010x})", self.code()),
            CommandId::DcQuery => write!(f, "DC({:#010x})", self.code()),
            CommandId::EnergyQuery => write!(f, "ENERGY({:#010x})", self.code()),
            CommandId::DeviceQuery => write!(f, "DEVICE({:#010x})", self.code()),
            CommandId::Login => write!(f, "LOGIN({:#010x})", self.code()),
            CommandId::Logoff => write!(f, "LOGOFF({:#010x})", self.code()),
            CommandId::Discovery => write!(f, "DISCOVERY({:#010x})", self.code()),
            CommandId::DiscoveryResponse => write!(f, "DISCOVERY-RSP({:#010x})", self.code()),
        }
    }
}

/// Value encoding of an inverter register record, taken from the top byte of
/// the record word.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RawDataType {
    /// Unsigned 32 bit values, NaN marker `0xFFFFFFFF`.
    Unsigned32,
    /// Status value list, the selected entry tagged with `0x01000000`.
    Status32,
    /// 32 byte string.
    String32,
    /// IEEE float. Announced by the protocol but not produced by any known
    /// device.
    Float,
    /// Signed 32 bit values, NaN marker `0x80000000`.
    Signed32,
    /// Anything else.
    Unknown(u8),
}

impl RawDataType {
    /// Map the top byte of a record word.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::Unsigned32,
            0x08 => Self::Status32,
            0x10 => Self::String32,
            0x20 => Self::Float,
            0x40 => Self::Signed32,
            other => Self::Unknown(other),
        }
    }
}

/// One decoded register record from an inverter reply.
#[derive(Debug, Copy, Clone)]
pub struct RawRecord {
    /// Command id of the reply the record came from.
    pub command: u32,
    /// Register id, mask `0x00FFFF00` of the record word.
    pub register_id: u32,
    /// Connector number, low byte of the record word.
    pub connector: u8,
    /// Value encoding, top byte of the record word.
    pub data_type: RawDataType,
    /// Device timestamp in inverter seconds.
    pub time: u32,
    /// Raw value bytes.
    pub data: [u8; MAX_RECORD_PAYLOAD],
    /// Number of valid bytes in `data`.
    pub data_len: u8,
}

impl RawRecord {
    /// The valid value bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.data_len)]
    }

    /// Little-endian `u32` at `offset` into the value bytes.
    pub fn value_u32(&self, offset: usize) -> Option<u32> {
        if offset + 4 > self.payload().len() {
            return None;
        }
        Some(wire::le::read_u32(self.payload(), offset))
    }

    /// The value bytes interpreted as a NUL padded string.
    pub fn value_string(&self) -> String {
        let bytes = self.payload();
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Packed map key combining register id and connector.
    pub fn key(&self) -> u32 {
        self.register_id | u32::from(self.connector)
    }
}

/// View over the functional payload of an inverter packet.
#[derive(Debug, Copy, Clone)]
pub struct InverterPacket<'a> {
    payload: &'a [u8],
}

impl<'a> InverterPacket<'a> {
    /// View the inverter payload of the given Data2 packet.
    ///
    /// Requires the Data2 sub-layout invariants to hold, see
    /// [`Data2Packet::check_inverter_layout`].
    pub fn parse(data2: &Data2Packet<'a>) -> Result<Self, ProtocolError> {
        data2.check_inverter_layout()?;

        let payload = data2.functional_payload();
        if payload.len() < DATA {
            return Err(ProtocolError::PayloadTooShort(data2.tag_length()));
        }

        Ok(Self { payload })
    }

    /// Destination device address.
    pub fn dst_address(&self) -> DeviceAddress {
        DeviceAddress::new(
            wire::le::read_u16(self.payload, DST_SUSY_ID),
            wire::le::read_u32(self.payload, DST_SERIAL_NUMBER),
        )
    }

    /// Destination control word.
    pub fn dst_control(&self) -> u16 {
        wire::le::read_u16(self.payload, DST_CONTROL)
    }

    /// Source device address.
    pub fn src_address(&self) -> DeviceAddress {
        DeviceAddress::new(
            wire::le::read_u16(self.payload, SRC_SUSY_ID),
            wire::le::read_u32(self.payload, SRC_SERIAL_NUMBER),
        )
    }

    /// Source control word.
    pub fn src_control(&self) -> u16 {
        wire::le::read_u16(self.payload, SRC_CONTROL)
    }

    /// Error code; zero on success.
    pub fn error_code(&self) -> u16 {
        wire::le::read_u16(self.payload, ERROR_CODE)
    }

    /// Fragment counter of multi-packet replies, counting down to zero.
    pub fn fragment_counter(&self) -> u16 {
        wire::le::read_u16(self.payload, FRAGMENT_COUNTER)
    }

    /// Packet id correlating a reply to its request.
    pub fn packet_id(&self) -> u16 {
        wire::le::read_u16(self.payload, PACKET_ID)
    }

    /// Command id.
    pub fn command_id(&self) -> u32 {
        wire::le::read_u32(self.payload, COMMAND_ID)
    }

    /// First register id of the inclusive reply range.
    pub fn first_register_id(&self) -> u32 {
        wire::le::read_u32(self.payload, FIRST_REGISTER_ID)
    }

    /// Last register id of the inclusive reply range.
    pub fn last_register_id(&self) -> u32 {
        wire::le::read_u32(self.payload, LAST_REGISTER_ID)
    }

    /// The record area following the fixed header.
    pub fn record_area(&self) -> &'a [u8] {
        &self.payload[DATA..]
    }

    /// The uniform record length of this reply.
    ///
    /// Replies do not encode the record length; it is inferred by dividing
    /// the record area, minus its 4 byte zero trailer word, evenly over the
    /// announced register range. Each record needs at least 4 bytes of head,
    /// 4 bytes of timestamp and one 4 byte value.
    pub fn record_length(&self) -> Result<usize, ProtocolError> {
        let registers = self
            .last_register_id()
            .wrapping_sub(self.first_register_id())
            .wrapping_add(1);

        let Some(payload) = self.record_area().len().checked_sub(4) else {
            return Err(ProtocolError::RecordLength {
                payload: self.record_area().len(),
                registers,
            });
        };

        if registers == 0 || payload % registers as usize != 0 {
            return Err(ProtocolError::RecordLength { payload, registers });
        }

        let length = payload / registers as usize;
        if length < 12 {
            return Err(ProtocolError::RecordLength { payload, registers });
        }

        Ok(length)
    }

    /// Iterate the records of this reply.
    ///
    /// Iteration stops at the first all-zero record word or at the end of
    /// the record area.
    pub fn records(&self) -> Result<RecordIter<'a>, ProtocolError> {
        Ok(RecordIter {
            area: self.record_area(),
            record_length: self.record_length()?,
            command: self.command_id(),
            offset: 0,
        })
    }
}

/// Iterator over the records of an inverter reply.
#[derive(Debug)]
pub struct RecordIter<'a> {
    area: &'a [u8],
    record_length: usize,
    command: u32,
    offset: usize,
}

impl Iterator for RecordIter<'_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        if self.offset + self.record_length > self.area.len() {
            return None;
        }

        let word = wire::le::read_u32(self.area, self.offset);
        if word == 0 {
            return None;
        }

        let value_bytes = (self.record_length - 8).min(MAX_RECORD_PAYLOAD);
        let mut data = [0u8; MAX_RECORD_PAYLOAD];
        data[..value_bytes].copy_from_slice(
            &self.area[self.offset + 8..self.offset + 8 + value_bytes],
        );

        let record = RawRecord {
            command: self.command,
            register_id: word & 0x00ff_ff00,
            connector: (word & 0xff) as u8,
            data_type: RawDataType::from_raw((word >> 24) as u8),
            time: wire::le::read_u32(self.area, self.offset + 4),
            data,
            data_len: value_bytes as u8,
        };

        self.offset += self.record_length;

        Some(record)
    }
}

/// An outbound inverter request.
///
/// The builder produces the complete Speedwire packet including the outer
/// framing. Requests carry control byte `0xA0` in the Data2 header.
#[derive(Debug, Clone)]
pub struct InverterRequest {
    /// Destination device address.
    pub dst: DeviceAddress,
    /// Destination control word.
    pub dst_control: u16,
    /// Source device address, normally [`DeviceAddress::LOCAL`].
    pub src: DeviceAddress,
    /// Source control word.
    pub src_control: u16,
    /// Packet id with the request bit set.
    pub packet_id: u16,
    /// Command id.
    pub command_id: u32,
    /// First register id.
    pub first_register_id: u32,
    /// Last register id.
    pub last_register_id: u32,
    /// Request data following the register range.
    pub data: Vec<u8>,
}

impl InverterRequest {
    /// A register range query.
    pub fn query(
        dst: DeviceAddress,
        packet_id: u16,
        command: CommandId,
        first_register_id: u32,
        last_register_id: u32,
    ) -> Self {
        Self {
            dst,
            dst_control: 0x0100,
            src: DeviceAddress::LOCAL,
            src_control: 0x0100,
            packet_id,
            command_id: command.code(),
            first_register_id,
            last_register_id,
            data: Vec::new(),
        }
    }

    /// A login request.
    ///
    /// The password is padded to 12 bytes and obfuscated by adding a per-role
    /// constant to every byte. The request data carries the current inverter
    /// time, a zero word and the encoded password; the last register id field
    /// doubles as the session timeout of 900 seconds.
    pub fn login(
        dst: DeviceAddress,
        packet_id: u16,
        role: LoginRole,
        password: &str,
        inverter_time: u32,
    ) -> Self {
        let mut data = Vec::with_capacity(20);
        data.extend_from_slice(&inverter_time.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&encode_password(password, role));

        Self {
            dst,
            dst_control: 0x0100,
            src: DeviceAddress::LOCAL,
            src_control: 0x0100,
            packet_id,
            command_id: CommandId::Login.code(),
            first_register_id: role.code(),
            last_register_id: 0x0000_0384,
            data,
        }
    }

    /// A logoff request. Broadcast to the device, never answered.
    pub fn logoff(packet_id: u16) -> Self {
        Self {
            dst: DeviceAddress::BROADCAST,
            dst_control: 0x0300,
            src: DeviceAddress::LOCAL,
            src_control: 0x0300,
            packet_id,
            command_id: CommandId::Logoff.code(),
            first_register_id: 0xffff_ffff,
            last_register_id: 0,
            data: Vec::new(),
        }
    }

    /// Encode the request into a complete Speedwire packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(DATA + self.data.len());

        payload.extend_from_slice(&self.dst.susy_id.to_le_bytes());
        payload.extend_from_slice(&self.dst.serial_number.to_le_bytes());
        payload.extend_from_slice(&self.dst_control.to_le_bytes());
        payload.extend_from_slice(&self.src.susy_id.to_le_bytes());
        payload.extend_from_slice(&self.src.serial_number.to_le_bytes());
        payload.extend_from_slice(&self.src_control.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&self.packet_id.to_le_bytes());
        payload.extend_from_slice(&self.command_id.to_le_bytes());
        payload.extend_from_slice(&self.first_register_id.to_le_bytes());
        payload.extend_from_slice(&self.last_register_id.to_le_bytes());
        payload.extend_from_slice(&self.data);

        let mut builder = FrameBuilder::new(1);
        builder.data2_with_control(PROTOCOL_INVERTER, 0xa0, &payload);
        builder.finish()
    }
}

/// Pad and obfuscate a login password for the wire.
fn encode_password(password: &str, role: LoginRole) -> [u8; 12] {
    let offset = role.password_offset();
    let mut encoded = [offset; 12];

    for (slot, byte) in encoded.iter_mut().zip(password.bytes()) {
        *slot = byte.wrapping_add(offset);
    }

    encoded
}
