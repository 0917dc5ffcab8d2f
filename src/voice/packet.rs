//! Voice packet codec.
//!
//! ```text
//! Offset  Len  Field
//!  0       1   version (bits 6-7)
//!  1       1   marker (bit 7), payload type (bits 0-6)
//!  2       2   sequence (big-endian)
//!  4       4   timestamp (big-endian)
//!  8       4   SSRC (big-endian)
//! 12+      N   payload
//! ```

/// Size of the fixed voice packet header.
pub const HEADER_SIZE: usize = 12;

/// Payload type used for Opus audio.
pub const OPUS_PAYLOAD_TYPE: u8 = 0x78;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePacketHeader {
    pub version: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl VoicePacketHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = (self.version & 0x03) << 6;
        buf[1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 };
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }
}

/// A decoded packet borrowing its payload from the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePacket<'a> {
    pub header: VoicePacketHeader,
    pub payload: &'a [u8],
}

/// Decode a voice packet. Anything shorter than the header is noise and
/// yields `None`.
pub fn decode(buf: &[u8]) -> Option<VoicePacket<'_>> {
    if buf.len() < HEADER_SIZE {
        return None;
    }

    let header = VoicePacketHeader {
        version: buf[0] >> 6,
        marker: buf[1] & 0x80 != 0,
        payload_type: buf[1] & 0x7F,
        sequence: u16::from_be_bytes([buf[2], buf[3]]),
        timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
    };

    Some(VoicePacket {
        header,
        payload: &buf[HEADER_SIZE..],
    })
}
