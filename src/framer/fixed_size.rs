//! Fixed-size framing (§4.B): every frame is exactly `frame_size` bytes,
//! no header, no terminator.

use super::{Decoded, Framer, ProtocolError, Request};
use bytes::BytesMut;

pub struct FixedSizeFramer {
    frame_size: usize,
}

impl FixedSizeFramer {
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        Self { frame_size }
    }
}

impl Framer for FixedSizeFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtocolError> {
        if buf.len() < self.frame_size {
            return Ok(None);
        }
        let frame = buf.split_to(self.frame_size).freeze();
        Ok(Some(Decoded {
            request: Request::new("FRAME", frame),
            next_framer: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn waits_for_full_frame() {
        let mut framer = FixedSizeFramer::new(4);
        let mut buf = BytesMut::from(&b"ab"[..]);
        assert!(framer.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"cd");
        let decoded = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.request.payload, Bytes::from_static(b"abcd"));
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_residue_for_next_frame() {
        let mut framer = FixedSizeFramer::new(3);
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        let first = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.request.payload, Bytes::from_static(b"abc"));
        let second = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.request.payload, Bytes::from_static(b"def"));
        assert!(framer.decode(&mut buf).unwrap().is_none());
    }
}
