//! Fixed-prefix-length framing (§4.B): each frame is a fixed-width
//! big-endian length prefix followed by that many payload bytes.

use super::{Decoded, Framer, ProtocolError, Request};
use bytes::{Buf, BytesMut};

/// Width of the length prefix, in bytes. Only the widths that fit in a
/// `u32` are supported, which covers every realistic wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    One,
    Two,
    Four,
}

impl PrefixWidth {
    fn bytes(self) -> usize {
        match self {
            PrefixWidth::One => 1,
            PrefixWidth::Two => 2,
            PrefixWidth::Four => 4,
        }
    }
}

pub struct FixedPrefixLengthFramer {
    width: PrefixWidth,
    max_payload: usize,
}

impl FixedPrefixLengthFramer {
    pub fn new(width: PrefixWidth, max_payload: usize) -> Self {
        Self { width, max_payload }
    }

    fn peek_len(&self, buf: &BytesMut) -> usize {
        match self.width {
            PrefixWidth::One => buf[0] as usize,
            PrefixWidth::Two => u16::from_be_bytes([buf[0], buf[1]]) as usize,
            PrefixWidth::Four => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize,
        }
    }
}

impl Framer for FixedPrefixLengthFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtocolError> {
        let prefix_len = self.width.bytes();
        if buf.len() < prefix_len {
            return Ok(None);
        }

        let payload_len = self.peek_len(buf);
        if payload_len > self.max_payload {
            return Err(ProtocolError::Malformed(format!(
                "declared frame length {payload_len} exceeds max {}",
                self.max_payload
            )));
        }

        if buf.len() < prefix_len + payload_len {
            return Ok(None);
        }

        buf.advance(prefix_len);
        let payload = buf.split_to(payload_len).freeze();
        Ok(Some(Decoded { request: Request::new("FRAME", payload), next_framer: None }))
    }
}
