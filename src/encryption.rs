//! Parser for the encryption handshake protocol, Data2 payload `0x6075`.
//!
//! Newer devices announce WPA2 style pairing through these packets. This
//! crate only parses them far enough to identify and log the participants;
//! the handshake itself is not implemented.

use crate::{device::DeviceAddress, error::FrameError, packet::data2::Data2Packet};
use speedwire_wire as wire;

const PACKET_TYPE: usize = 0;
const SRC_SUSY_ID: usize = 1;
const SRC_SERIAL_NUMBER: usize = 3;
const DST_SUSY_ID: usize = 7;
const DST_SERIAL_NUMBER: usize = 9;
const DATA: usize = 13;

/// View over the functional payload of an encryption packet.
#[derive(Debug, Copy, Clone)]
pub struct EncryptionPacket<'a> {
    payload: &'a [u8],
}

impl<'a> EncryptionPacket<'a> {
    /// View the encryption payload of the given Data2 packet.
    pub fn parse(data2: &Data2Packet<'a>) -> Result<Self, FrameError> {
        let payload = data2.functional_payload();
        wire::check_len(payload, DATA)?;

        Ok(Self { payload })
    }

    /// Handshake packet type.
    pub fn packet_type(&self) -> u8 {
        self.payload[PACKET_TYPE]
    }

    /// Source device address.
    pub fn src_address(&self) -> DeviceAddress {
        DeviceAddress::new(
            wire::be::read_u16(self.payload, SRC_SUSY_ID),
            wire::be::read_u32(self.payload, SRC_SERIAL_NUMBER),
        )
    }

    /// Destination device address.
    pub fn dst_address(&self) -> DeviceAddress {
        DeviceAddress::new(
            wire::be::read_u16(self.payload, DST_SUSY_ID),
            wire::be::read_u32(self.payload, DST_SERIAL_NUMBER),
        )
    }

    /// Handshake data following the address pair.
    pub fn data(&self) -> &'a [u8] {
        &self.payload[DATA..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FrameBuilder, SpeedwireFrame, data2::PROTOCOL_ENCRYPTION};

    #[test]
    fn parses_handshake_announcement() {
        let mut payload = vec![0x01u8];
        payload.extend_from_slice(&0x017au16.to_be_bytes());
        payload.extend_from_slice(&0xb371_2a84u32.to_be_bytes());
        payload.extend_from_slice(&0xffffu16.to_be_bytes());
        payload.extend_from_slice(&0xffff_ffffu32.to_be_bytes());
        payload.extend_from_slice(&[0xde, 0xad]);

        let mut builder = FrameBuilder::new(1);
        builder.data2(PROTOCOL_ENCRYPTION, &payload);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let packet = EncryptionPacket::parse(&frame.data2().unwrap()).unwrap();

        assert_eq!(packet.packet_type(), 0x01);
        assert_eq!(packet.src_address(), DeviceAddress::new(0x017a, 0xb371_2a84));
        assert_eq!(packet.dst_address(), DeviceAddress::BROADCAST);
        assert_eq!(packet.data(), &[0xde, 0xad]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let mut builder = FrameBuilder::new(1);
        builder.data2(PROTOCOL_ENCRYPTION, &[0x01, 0x02]);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        assert!(EncryptionPacket::parse(&frame.data2().unwrap()).is_err());
    }
}
