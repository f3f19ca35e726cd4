//! RTP framing for the media leg.
//!
//! Inbound packets may carry CSRC lists, a header extension and padding;
//! outbound packets are always the bare 12-byte header plus payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{RelayError, RelayResult};

pub const RTP_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 12;

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

/// Parses one datagram, rejecting anything whose declared lengths do not fit.
pub fn decode(datagram: &[u8]) -> RelayResult<WirePacket> {
    if datagram.len() < HEADER_LEN {
        return Err(RelayError::MalformedPacket("shorter than fixed header"));
    }

    let b0 = datagram[0];
    let b1 = datagram[1];
    let version = b0 >> 6;
    if version != RTP_VERSION {
        return Err(RelayError::MalformedPacket("unsupported version"));
    }
    let padding = b0 & 0x20 != 0;
    let extension = b0 & 0x10 != 0;
    let csrc_count = b0 & 0x0F;

    let mut offset = HEADER_LEN + 4 * csrc_count as usize;
    if offset > datagram.len() {
        return Err(RelayError::MalformedPacket("truncated CSRC list"));
    }

    if extension {
        if offset + 4 > datagram.len() {
            return Err(RelayError::MalformedPacket("truncated extension header"));
        }
        // profile (2 bytes) then length in 32-bit words, excluding this header
        let words = u16::from_be_bytes([datagram[offset + 2], datagram[offset + 3]]) as usize;
        offset += 4 + 4 * words;
        if offset > datagram.len() {
            return Err(RelayError::MalformedPacket("truncated extension data"));
        }
    }

    let mut end = datagram.len();
    if padding {
        let pad = datagram[end - 1] as usize;
        if pad > end - offset {
            return Err(RelayError::MalformedPacket("padding exceeds payload"));
        }
        end -= pad;
    }

    Ok(WirePacket {
        version,
        padding,
        extension,
        csrc_count,
        marker: b1 & 0x80 != 0,
        payload_type: b1 & 0x7F,
        sequence: u16::from_be_bytes([datagram[2], datagram[3]]),
        timestamp: u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]),
        ssrc: u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]),
        payload: Bytes::copy_from_slice(&datagram[offset..end]),
    })
}

/// Builds an outbound packet: no padding, no extension, no CSRCs, marker clear.
pub fn encode(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(RTP_VERSION << 6);
    buf.put_u8(payload_type & 0x7F);
    buf.put_u16(sequence);
    buf.put_u32(timestamp);
    buf.put_u32(ssrc);
    buf.put_slice(payload);
    buf.freeze()
}
