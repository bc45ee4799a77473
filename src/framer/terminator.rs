//! Terminator-delimited framing (§4.B): the canonical hard case. A frame
//! ends at the first occurrence of a fixed byte sequence (e.g. `\r\n`).
//! Terminators may straddle two receives, so the framer tracks how far it
//! has already scanned without a match to avoid rescanning from the start
//! of the buffer on every partial receive.

use super::{Decoded, Framer, ProtocolError, Request};
use bytes::{Buf, Bytes, BytesMut};

/// Splits the stream on a fixed terminator sequence and produces a
/// [`Request`] from each line in between, via [`Request::from_line`].
pub struct TerminatorFramer {
    terminator: Vec<u8>,
    /// Offset into the buffer already confirmed not to contain (the start
    /// of) the terminator. Resumed from on the next call instead of
    /// rescanning from zero.
    scanned: usize,
}

impl TerminatorFramer {
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        let terminator = terminator.into();
        assert!(!terminator.is_empty(), "terminator must not be empty");
        Self { terminator, scanned: 0 }
    }

    /// Convenience constructor for the common `\r\n` line protocol used in
    /// the end-to-end scenarios of §8.
    pub fn crlf() -> Self {
        Self::new(b"\r\n".to_vec())
    }

    fn find_terminator(&self, buf: &[u8]) -> Option<usize> {
        // Resume scanning one terminator-length back from where we left
        // off, so a terminator that straddles the previously-scanned
        // region and freshly-received bytes is still found.
        let resume_from = self.scanned.saturating_sub(self.terminator.len().saturating_sub(1));
        if resume_from >= buf.len() {
            return None;
        }
        buf[resume_from..]
            .windows(self.terminator.len())
            .position(|w| w == self.terminator.as_slice())
            .map(|pos| resume_from + pos)
    }
}

impl Framer for TerminatorFramer {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtocolError> {
        if buf.len() < self.terminator.len() {
            self.scanned = buf.len();
            return Ok(None);
        }

        let Some(pos) = self.find_terminator(buf) else {
            // Nothing found; remember how much we've ruled out so the next
            // call doesn't redo this work from scratch.
            self.scanned = buf.len();
            return Ok(None);
        };

        let frame_len = pos + self.terminator.len();
        let frame: Bytes = buf.split_to(frame_len).freeze();
        let line = &frame[..pos];
        self.scanned = 0;

        let request = Request::from_line(line);
        // A worked example of the "next_filter" chaining in §4.B: a
        // `SWITCH <n>` line hands every byte from here on to a fixed-size
        // framer of `n` bytes per frame. Any residue already sitting in
        // `buf` from this same read is decoded by the new framer on the
        // very next call, not reparsed against this one (§9 Open Question).
        let next_framer = if request.key.eq_ignore_ascii_case("SWITCH") {
            parse_frame_size(&request.payload)
                .map(|size| Box::new(super::FixedSizeFramer::new(size)) as Box<dyn Framer>)
        } else {
            None
        };

        Ok(Some(Decoded { request, next_framer }))
    }
}

fn parse_frame_size(payload: &[u8]) -> Option<usize> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}
