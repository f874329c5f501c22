//! Speedwire packet framing: the outer tag stream shared by every protocol.
//!
//! A Speedwire packet starts with the magic `"SMA\0"` word, followed by the
//! group tag carrying a 4 byte group id, then any number of
//! `(length, tag id, payload)` records and a terminating end-of-data tag:
//!
//! ```text
//! "SMA\0" | len=4, id=0x02A0, group id | len, id, payload | … | len=0, id=0
//! ```
//!
//! Tag headers and payload lengths are big-endian. The functional protocols
//! live in the payload of the Data2 tag (`0x0010`), see [`data2`].

pub mod data2;

use crate::error::FrameError;
use speedwire_wire as wire;

/// Tag id of the group tag that directly follows the signature.
pub const TAG_GROUP: u16 = 0x02a0;
/// Tag id of the Data2 tag holding the functional protocols.
pub const TAG_DATA2: u16 = 0x0010;
/// Tag id used by multicast discovery requests and responses.
pub const TAG_DISCOVERY: u16 = 0x0020;
/// Tag id carrying the device ip address in discovery responses.
pub const TAG_IP_ADDRESS: u16 = 0x0030;
/// Tag id of the end-of-data terminator.
pub const TAG_END_OF_DATA: u16 = 0x0000;

/// Byte length of a tag header: length field plus tag id.
pub const TAG_HEADER_LEN: usize = 4;

/// Offset of the first tag after signature, group tag header and group id.
const FIRST_TAG_OFFSET: usize = 12;

const SIGNATURE: [u8; 4] = *b"SMA\0";

/// A validated view over a Speedwire packet.
///
/// The frame owns nothing; it borrows the receive buffer and hands out
/// bounded sub-views into it.
#[derive(Debug, Copy, Clone)]
pub struct SpeedwireFrame<'a> {
    buf: &'a [u8],
}

/// One tag of the tag stream.
#[derive(Debug, Copy, Clone)]
pub struct Tag<'a> {
    /// Offset of the tag header within the packet.
    pub offset: usize,
    /// Tag id.
    pub id: u16,
    /// Tag payload.
    pub payload: &'a [u8],
}

impl<'a> SpeedwireFrame<'a> {
    /// Validate the fixed packet prologue and return a frame view.
    pub fn parse(buf: &'a [u8]) -> Result<Self, FrameError> {
        wire::check_len(buf, FIRST_TAG_OFFSET + TAG_HEADER_LEN + TAG_HEADER_LEN)?;

        if buf[0..4] != SIGNATURE {
            return Err(FrameError::BadSignature);
        }

        if wire::be::read_u16(buf, 4) != 4 || wire::be::read_u16(buf, 6) != TAG_GROUP {
            return Err(FrameError::BadGroupTag);
        }

        Ok(Self { buf })
    }

    /// The raw packet bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// The group id carried by the group tag.
    pub fn group_id(&self) -> u32 {
        wire::be::read_u32(self.buf, 8)
    }

    /// Iterate the tag stream following the group tag.
    ///
    /// Iteration ends at the end-of-data tag (which is yielded) or as soon as
    /// a tag header or payload would run past the end of the buffer.
    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            buf: self.buf,
            offset: FIRST_TAG_OFFSET,
            done: false,
        }
    }

    /// First tag with the given id, end-of-data excluded.
    pub fn find_tag(&self, id: u16) -> Option<Tag<'a>> {
        self.tags()
            .find(|tag| tag.id == id && !(id == TAG_END_OF_DATA && tag.payload.is_empty()))
    }

    /// The end-of-data terminator, if the tag stream is properly terminated.
    pub fn find_end_of_data(&self) -> Option<Tag<'a>> {
        self.tags()
            .find(|tag| tag.id == TAG_END_OF_DATA && tag.payload.is_empty())
    }

    /// View the Data2 tag of this packet.
    pub fn data2(&self) -> Result<data2::Data2Packet<'a>, FrameError> {
        let tag = self
            .find_tag(TAG_DATA2)
            .ok_or(FrameError::MissingTag(TAG_DATA2))?;

        data2::Data2Packet::parse(tag.payload)
    }
}

/// Iterator over the tag stream of a [`SpeedwireFrame`].
#[derive(Debug)]
pub struct TagIter<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        if self.done || self.offset + TAG_HEADER_LEN > self.buf.len() {
            return None;
        }

        let length = usize::from(wire::be::read_u16(self.buf, self.offset));
        let id = wire::be::read_u16(self.buf, self.offset + 2);

        let payload_start = self.offset + TAG_HEADER_LEN;
        let payload_end = payload_start + length;
        if payload_end > self.buf.len() {
            return None;
        }

        let tag = Tag {
            offset: self.offset,
            id,
            payload: &self.buf[payload_start..payload_end],
        };

        if id == TAG_END_OF_DATA && length == 0 {
            self.done = true;
        }
        self.offset = payload_end;

        Some(tag)
    }
}

/// Builder assembling an outbound Speedwire packet.
#[derive(Debug)]
pub struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    /// Start a packet with the signature and a group tag carrying `group_id`.
    pub fn new(group_id: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&SIGNATURE);
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&TAG_GROUP.to_be_bytes());
        buf.extend_from_slice(&group_id.to_be_bytes());

        Self { buf }
    }

    /// Append an arbitrary tag.
    pub fn tag(&mut self, id: u16, payload: &[u8]) -> &mut Self {
        self.buf
            .extend_from_slice(&(payload.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(&id.to_be_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    /// Append a Data2 tag whose payload starts directly after the protocol
    /// id, as used by the emeter protocols.
    pub fn data2(&mut self, protocol_id: u16, payload: &[u8]) -> &mut Self {
        let mut body = Vec::with_capacity(2 + payload.len());
        body.extend_from_slice(&protocol_id.to_be_bytes());
        body.extend_from_slice(payload);
        self.tag(TAG_DATA2, &body)
    }

    /// Append a Data2 tag with the long words and control fields, as used by
    /// the inverter protocol. The long words field counts the 4 byte words
    /// following the protocol id.
    pub fn data2_with_control(&mut self, protocol_id: u16, control: u8, payload: &[u8]) -> &mut Self {
        let long_words = ((2 + payload.len()) / 4) as u8;

        let mut body = Vec::with_capacity(4 + payload.len());
        body.extend_from_slice(&protocol_id.to_be_bytes());
        body.push(long_words);
        body.push(control);
        body.extend_from_slice(payload);
        self.tag(TAG_DATA2, &body)
    }

    /// Terminate the tag stream and return the packet bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&0u16.to_be_bytes());
        self.buf.extend_from_slice(&TAG_END_OF_DATA.to_be_bytes());
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // The documented 20 byte multicast discovery request.
    const MULTICAST_DISCOVERY: [u8; 20] = [
        0x53, 0x4d, 0x41, 0x00, 0x00, 0x04, 0x02, 0xa0, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00,
        0x20, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn parses_discovery_request() {
        let frame = SpeedwireFrame::parse(&MULTICAST_DISCOVERY).unwrap();

        assert_eq!(frame.group_id(), 0xffff_ffff);

        let tags: Vec<_> = frame.tags().map(|t| (t.id, t.payload.len())).collect();
        assert_eq!(tags, vec![(TAG_DISCOVERY, 0), (TAG_END_OF_DATA, 0)]);

        assert!(frame.find_tag(TAG_DISCOVERY).is_some());
        assert!(frame.find_end_of_data().is_some());
        assert!(frame.find_tag(TAG_DATA2).is_none());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = MULTICAST_DISCOVERY;
        buf[0] = b'X';

        assert_eq!(
            SpeedwireFrame::parse(&buf).unwrap_err(),
            FrameError::BadSignature
        );
    }

    #[test]
    fn rejects_bad_group_tag() {
        let mut buf = MULTICAST_DISCOVERY;
        buf[6] = 0x00;

        assert_eq!(
            SpeedwireFrame::parse(&buf).unwrap_err(),
            FrameError::BadGroupTag
        );
    }

    #[test]
    fn rejects_short_packet() {
        assert_eq!(
            SpeedwireFrame::parse(&MULTICAST_DISCOVERY[..16]).unwrap_err(),
            FrameError::Truncated {
                required: 20,
                available: 16
            }
        );
    }

    #[test]
    fn truncated_tag_payload_ends_iteration() {
        let mut builder = FrameBuilder::new(1);
        builder.tag(0x0070, &[0xef, 0x0c]);
        let mut buf = builder.finish();

        // Chop into the last tag header.
        buf.truncate(buf.len() - 2);

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let tags: Vec<_> = frame.tags().map(|t| t.id).collect();
        assert_eq!(tags, vec![0x0070]);
        assert!(frame.find_end_of_data().is_none());
    }

    #[test]
    fn builder_reproduces_multicast_discovery() {
        let mut builder = FrameBuilder::new(0xffff_ffff);
        builder.tag(TAG_DISCOVERY, &[]);

        assert_eq!(builder.finish(), MULTICAST_DISCOVERY);
    }

    #[test]
    fn zero_id_tag_with_payload_is_not_end_of_data() {
        // Discovery responses carry a tag with id 0 and a 2 byte payload
        // ahead of the real terminator.
        let mut builder = FrameBuilder::new(1);
        builder.tag(0x0000, &[0x00, 0x01]);
        builder.tag(0x0070, &[0xef, 0x0c]);
        let buf = builder.finish();

        let frame = SpeedwireFrame::parse(&buf).unwrap();
        let tags: Vec<_> = frame.tags().map(|t| (t.id, t.payload.len())).collect();
        assert_eq!(tags, vec![(0, 2), (0x0070, 2), (TAG_END_OF_DATA, 0)]);

        let eod = frame.find_end_of_data().unwrap();
        assert_eq!(eod.offset, buf.len() - 4);
    }
}
