//! The emeter measurement protocol carried in Data2 payloads `0x6069` and
//! `0x6081`.

use crate::{
    error::FrameError,
    obis::{FIRMWARE_VERSION_CHANNEL, ObisId},
    packet::data2::Data2Packet,
};
use speedwire_wire as wire;

const SUSY_ID_OFFSET: usize = 0;
const SERIAL_NUMBER_OFFSET: usize = 2;
const TIME_OFFSET: usize = 6;
const FIRST_OBIS_OFFSET: usize = 10;

/// View over the functional payload of an emeter packet.
///
/// All fields are big-endian. The device identity and a millisecond
/// timestamp are followed by a dense stream of OBIS elements.
#[derive(Debug, Copy, Clone)]
pub struct EmeterPacket<'a> {
    payload: &'a [u8],
}

impl<'a> EmeterPacket<'a> {
    /// View the emeter payload of the given Data2 packet.
    pub fn parse(data2: &Data2Packet<'a>) -> Result<Self, FrameError> {
        let payload = data2.functional_payload();
        wire::check_len(payload, FIRST_OBIS_OFFSET)?;

        Ok(Self { payload })
    }

    /// Subsystem id of the sending meter.
    pub fn susy_id(&self) -> u16 {
        wire::be::read_u16(self.payload, SUSY_ID_OFFSET)
    }

    /// Serial number of the sending meter.
    pub fn serial_number(&self) -> u32 {
        wire::be::read_u32(self.payload, SERIAL_NUMBER_OFFSET)
    }

    /// Meter timestamp in milliseconds.
    pub fn timestamp(&self) -> u32 {
        wire::be::read_u32(self.payload, TIME_OFFSET)
    }

    /// Iterate the OBIS elements of this packet.
    pub fn obis_elements(&self) -> ObisIter<'a> {
        ObisIter {
            payload: self.payload,
            offset: FIRST_OBIS_OFFSET,
        }
    }
}

/// One OBIS element within an emeter packet.
#[derive(Debug, Copy, Clone)]
pub struct ObisElement<'a> {
    /// The element identifier from the 4 byte head.
    pub id: ObisId,
    /// The value bytes following the head.
    pub payload: &'a [u8],
}

impl ObisElement<'_> {
    /// Total element length: the 4 byte head plus the payload, whose length
    /// is given by the type byte. The firmware version channel is the
    /// exception: its type byte is 0 but it carries a 4 byte payload.
    pub fn wire_length(id: ObisId) -> usize {
        if id.channel == FIRMWARE_VERSION_CHANNEL {
            return 8;
        }
        4 + usize::from(id.kind)
    }

    /// `true` for the end-of-data marker element.
    pub fn is_end_of_data(&self) -> bool {
        self.id == ObisId::new(0, 0, 0, 0)
    }

    /// Unsigned 32 bit value of a type 4 or firmware version element.
    pub fn value_u32(&self) -> u32 {
        wire::be::read_u32(self.payload, 0)
    }

    /// Signed 32 bit value of a type 7 element.
    pub fn value_i32(&self) -> i32 {
        self.value_u32() as i32
    }

    /// Unsigned 64 bit value of a type 8 element.
    pub fn value_u64(&self) -> u64 {
        wire::be::read_u64(self.payload, 0)
    }

    /// The firmware version rendered as `major.minor.build.revision`.
    pub fn firmware_version(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.payload[0], self.payload[1], self.payload[2], self.payload[3] as char
        )
    }
}

/// Iterator over the OBIS elements of an [`EmeterPacket`].
///
/// Iteration stops as soon as the next element head or body would run past
/// the end of the payload.
#[derive(Debug)]
pub struct ObisIter<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for ObisIter<'a> {
    type Item = ObisElement<'a>;

    fn next(&mut self) -> Option<ObisElement<'a>> {
        if self.offset + 4 > self.payload.len() {
            return None;
        }

        let id = ObisId::new(
            self.payload[self.offset],
            self.payload[self.offset + 1],
            self.payload[self.offset + 2],
            self.payload[self.offset + 3],
        );

        let length = ObisElement::wire_length(id);
        if self.offset + length > self.payload.len() {
            return None;
        }

        let element = ObisElement {
            id,
            payload: &self.payload[self.offset + 4..self.offset + length],
        };

        self.offset += length;

        Some(element)
    }
}

/// Assemble an emeter functional payload. Used by the discovery responder
/// path of tests and tools; real meters produce these packets themselves.
#[derive(Debug)]
pub struct EmeterPayloadBuilder {
    buf: Vec<u8>,
}

impl EmeterPayloadBuilder {
    /// Start a payload with the device identity and timestamp.
    pub fn new(susy_id: u16, serial_number: u32, timestamp: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&susy_id.to_be_bytes());
        buf.extend_from_slice(&serial_number.to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());

        Self { buf }
    }

    /// Append a type 4 element.
    pub fn element_u32(&mut self, id: ObisId, value: u32) -> &mut Self {
        self.head(id);
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a type 8 element.
    pub fn element_u64(&mut self, id: ObisId, value: u64) -> &mut Self {
        self.head(id);
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append the end-of-data marker element.
    pub fn end_of_data(&mut self) -> &mut Self {
        self.head(ObisId::new(0, 0, 0, 0));
        self
    }

    fn head(&mut self, id: ObisId) {
        self.buf
            .extend_from_slice(&[id.channel, id.index, id.kind, id.tariff]);
    }

    /// The finished functional payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FrameBuilder, SpeedwireFrame, data2::PROTOCOL_EMETER};
    use crate::obis;

    fn emeter_frame(payload: Vec<u8>) -> Vec<u8> {
        let mut builder = FrameBuilder::new(1);
        builder.data2(PROTOCOL_EMETER, &payload);
        builder.finish()
    }

    #[test]
    fn header_fields() {
        let mut payload = EmeterPayloadBuilder::new(0x015d, 0x7099_9e06, 0x0102_0304);
        payload.end_of_data();
        let buf = emeter_frame(payload.finish());

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let emeter = EmeterPacket::parse(&frame.data2().unwrap()).unwrap();

        assert_eq!(emeter.susy_id(), 0x015d);
        assert_eq!(emeter.serial_number(), 0x7099_9e06);
        assert_eq!(emeter.timestamp(), 0x0102_0304);
    }

    #[test]
    fn element_lengths() {
        assert_eq!(ObisElement::wire_length(ObisId::new(0, 1, 4, 0)), 8);
        assert_eq!(ObisElement::wire_length(ObisId::new(0, 1, 8, 0)), 12);
        assert_eq!(ObisElement::wire_length(ObisId::new(0, 16, 7, 0)), 11);
        // Firmware version: type byte 0 but a 4 byte payload.
        assert_eq!(ObisElement::wire_length(ObisId::new(144, 0, 0, 0)), 8);
        assert_eq!(ObisElement::wire_length(ObisId::new(0, 0, 0, 0)), 4);
    }

    #[test]
    fn iterates_elements() {
        let mut payload = EmeterPayloadBuilder::new(0x015d, 1234, 1000);
        payload
            .element_u32(obis::POSITIVE_ACTIVE_POWER_TOTAL.id, 0x57)
            .element_u64(obis::POSITIVE_ACTIVE_ENERGY_TOTAL.id, 123_456)
            .element_u32(obis::VOLTAGE_L1.id, 230_000)
            .end_of_data();
        let buf = emeter_frame(payload.finish());

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let emeter = EmeterPacket::parse(&frame.data2().unwrap()).unwrap();

        let elements: Vec<_> = emeter.obis_elements().collect();
        assert_eq!(elements.len(), 4);

        assert_eq!(elements[0].id, obis::POSITIVE_ACTIVE_POWER_TOTAL.id);
        assert_eq!(elements[0].value_u32(), 0x57);
        assert_eq!(elements[1].value_u64(), 123_456);
        assert_eq!(elements[2].value_u32(), 230_000);
        assert!(elements[3].is_end_of_data());
    }

    #[test]
    fn truncated_element_ends_iteration() {
        let mut payload = EmeterPayloadBuilder::new(0x015d, 1234, 1000);
        payload.element_u32(obis::POSITIVE_ACTIVE_POWER_TOTAL.id, 0x57);
        let mut bytes = payload.finish();
        // A 4 byte head announcing an 8 byte body that is not there.
        bytes.extend_from_slice(&[0, 1, 8, 0, 0xaa]);

        // Hand the payload to the iterator directly; the tag layer would
        // also have accepted this length.
        let emeter = EmeterPacket {
            payload: &bytes,
        };

        let elements: Vec<_> = emeter.obis_elements().collect();
        assert_eq!(elements.len(), 1);
    }
}
