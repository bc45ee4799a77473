//! Begin/end mark framing (§4.B): a frame starts after a fixed begin
//! marker and ends at a fixed end marker; bytes before the begin marker
//! (if any) are discarded as noise between frames.

use super::{Decoded, Framer, ProtocolError, Request};
use bytes::{Buf, Bytes, BytesMut};

pub struct BeginEndMarkFramer {
    begin: Vec<u8>,
    end: Vec<u8>,
}

impl BeginEndMarkFramer {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        let begin = begin.into();
        let end = end.into();
        assert!(!begin.is_empty() && !end.is_empty(), "markers must not be empty");
        Self { begin, end }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.len() > haystack.len() {
            return None;
        }
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}

impl Framer for BeginEndMarkFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtocolError> {
        let Some(begin_pos) = Self::find(buf, &self.begin) else {
            // No begin marker yet; if the buffer is already larger than any
            // plausible marker, drop everything except a marker-length tail
            // that might be a partial begin marker.
            let keep_from = buf.len().saturating_sub(self.begin.len().saturating_sub(1));
            buf.advance(keep_from);
            return Ok(None);
        };

        let content_start = begin_pos + self.begin.len();
        let Some(end_pos_rel) = Self::find(&buf[content_start..], &self.end) else {
            if begin_pos > 0 {
                buf.advance(begin_pos);
            }
            return Ok(None);
        };

        let end_pos = content_start + end_pos_rel;
        let frame_end = end_pos + self.end.len();

        let frame: Bytes = buf.split_to(frame_end).freeze();
        let payload = frame.slice(content_start..end_pos);
        Ok(Some(Decoded { request: Request::new("FRAME", payload), next_framer: None }))
    }
}
