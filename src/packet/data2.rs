//! The Data2 tag: Speedwire's container for the functional protocols.

use crate::error::{FrameError, ProtocolError};
use speedwire_wire as wire;

/// Protocol id of SMA Data1 packets.
pub const PROTOCOL_DATA1: u16 = 0x4041;
/// Protocol id of emeter measurement packets.
pub const PROTOCOL_EMETER: u16 = 0x6069;
/// Protocol id of extended emeter packets sent by home managers.
pub const PROTOCOL_EXTENDED_EMETER: u16 = 0x6081;
/// Protocol id of inverter request/response packets.
pub const PROTOCOL_INVERTER: u16 = 0x6065;
/// Protocol id of encryption handshake packets.
pub const PROTOCOL_ENCRYPTION: u16 = 0x6075;

/// View over the payload of a Data2 tag.
///
/// The payload starts with a big-endian protocol id. The inverter and
/// extended emeter protocols insert a long-words count and a control byte
/// before the functional payload; the emeter and encryption payloads follow
/// the protocol id directly.
#[derive(Debug, Copy, Clone)]
pub struct Data2Packet<'a> {
    payload: &'a [u8],
}

impl<'a> Data2Packet<'a> {
    /// Wrap the payload of a Data2 tag.
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        wire::check_len(payload, 2)?;

        Ok(Self { payload })
    }

    /// The protocol id.
    pub fn protocol_id(&self) -> u16 {
        wire::be::read_u16(self.payload, 0)
    }

    /// The Data2 tag length this payload was carried in.
    pub fn tag_length(&self) -> u16 {
        self.payload.len() as u16
    }

    /// `true` if this payload carries a long-words and control field.
    fn has_control(&self) -> bool {
        matches!(
            self.protocol_id(),
            PROTOCOL_INVERTER | PROTOCOL_EXTENDED_EMETER
        )
    }

    /// The long-words field: the number of 4 byte words following the
    /// protocol id. Inverter and extended emeter payloads only.
    pub fn long_words(&self) -> u8 {
        self.payload[2]
    }

    /// The control byte. Inverter and extended emeter payloads only.
    pub fn control(&self) -> u8 {
        self.payload[3]
    }

    /// The functional payload behind the per-protocol header fields.
    pub fn functional_payload(&self) -> &'a [u8] {
        if self.has_control() {
            &self.payload[4..]
        } else {
            &self.payload[2..]
        }
    }

    /// Enforce the inverter sub-layout invariants before the functional
    /// payload is interpreted.
    ///
    /// The tag must be long enough for the address pair and packet id, and
    /// the long-words field must agree with the tag length.
    pub fn check_inverter_layout(&self) -> Result<(), ProtocolError> {
        let tag_length = self.tag_length();

        // Room for the address pair (8 + 8) plus error code, fragment
        // counter and packet id.
        if tag_length < 8 + 8 + 6 {
            return Err(ProtocolError::PayloadTooShort(tag_length));
        }

        if u16::from(self.long_words()) * 4 != tag_length - 2 {
            return Err(ProtocolError::LongWordsMismatch {
                long_words: self.long_words(),
                tag_length,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FrameBuilder, SpeedwireFrame};

    #[test]
    fn emeter_payload_starts_after_protocol_id() {
        let mut builder = FrameBuilder::new(1);
        builder.data2(PROTOCOL_EMETER, &[0xaa, 0xbb, 0xcc]);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let data2 = frame.data2().unwrap();

        assert_eq!(data2.protocol_id(), PROTOCOL_EMETER);
        assert_eq!(data2.functional_payload(), &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn inverter_payload_starts_after_control() {
        let payload = [0u8; 34];
        let mut builder = FrameBuilder::new(1);
        builder.data2_with_control(PROTOCOL_INVERTER, 0xa0, &payload);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let data2 = frame.data2().unwrap();

        assert_eq!(data2.protocol_id(), PROTOCOL_INVERTER);
        assert_eq!(data2.long_words(), 9);
        assert_eq!(data2.control(), 0xa0);
        assert_eq!(data2.functional_payload().len(), 34);
        assert_eq!(data2.check_inverter_layout(), Ok(()));
    }

    #[test]
    fn long_words_mismatch_is_rejected() {
        let payload = [0u8; 34];
        let mut builder = FrameBuilder::new(1);
        builder.data2_with_control(PROTOCOL_INVERTER, 0xa0, &payload);
        let mut buf = builder.finish();

        // Corrupt the long words field (offset 12 tag header + 4 + 2).
        buf[18] = 0x55;

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let data2 = frame.data2().unwrap();

        assert_eq!(
            data2.check_inverter_layout(),
            Err(ProtocolError::LongWordsMismatch {
                long_words: 0x55,
                tag_length: 38
            })
        );
    }

    #[test]
    fn short_inverter_payload_is_rejected() {
        let payload = [0u8; 10];
        let mut builder = FrameBuilder::new(1);
        builder.data2_with_control(PROTOCOL_INVERTER, 0xa0, &payload);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let data2 = frame.data2().unwrap();

        assert_eq!(
            data2.check_inverter_layout(),
            Err(ProtocolError::PayloadTooShort(14))
        );
    }
}
