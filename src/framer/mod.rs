//! The framer / request filter (§4.B): the pluggable, stateful
//! stream-to-request parser.
//!
//! A [`Framer`] owns whatever partial-frame state it needs between calls.
//! It is handed the session's accumulation buffer directly (a `BytesMut`),
//! which already gives the "residue preserved across receives" guarantee
//! from §8 for free: bytes a framer does not consume with `split_to`/
//! `advance` simply remain in the buffer for the next call. What §4.B
//! calls "left_buffer_size" is just `buf.len()` after a call that produced
//! no request — the socket session checks that against
//! `max_request_length` to close oversize sessions (§8 boundary behavior).

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

pub mod begin_end;
pub mod fixed_prefix;
pub mod fixed_size;
pub mod terminator;

pub use begin_end::BeginEndMarkFramer;
pub use fixed_prefix::FixedPrefixLengthFramer;
pub use fixed_size::FixedSizeFramer;
pub use terminator::TerminatorFramer;

/// A framed application request: a dispatch key plus its payload.
///
/// The framer is responsible for producing both — for line-oriented
/// protocols that typically means splitting the first whitespace-delimited
/// token off the frame, for binary protocols it might mean an opcode byte.
#[derive(Debug, Clone)]
pub struct Request {
    pub key: String,
    pub payload: Bytes,
}

impl Request {
    pub fn new(key: impl Into<String>, payload: Bytes) -> Self {
        Self { key: key.into(), payload }
    }

    /// Splits a line-oriented frame `"KEY arg1 arg2"` into a [`Request`]
    /// whose key is the first whitespace-delimited token and whose payload
    /// is everything after it (trimmed of leading whitespace). An empty
    /// line yields an empty key and an empty payload — a valid request
    /// per §8's "empty frame is a valid request with empty payload".
    pub fn from_line(line: &[u8]) -> Self {
        let text = String::from_utf8_lossy(line);
        match text.find(char::is_whitespace) {
            Some(idx) => {
                let key = text[..idx].to_string();
                let payload = text[idx..].trim_start().to_string();
                Request::new(key, Bytes::from(payload.into_bytes()))
            }
            None => Request::new(text.to_string(), Bytes::new()),
        }
    }
}

/// Error raised by a framer when the accumulated bytes cannot validly
/// belong to its protocol. Maps to [`crate::session::CloseReason::ProtocolError`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// One decode step's result: the request plus an optional protocol
/// upgrade. When `next_framer` is `Some`, the socket session replaces its
/// active framer with it *after* this call returns — any bytes still left
/// in the buffer are handed to the new framer starting from the next
/// `decode` call, never retroactively reparsed (§9 Open Question).
pub struct Decoded {
    pub request: Request,
    pub next_framer: Option<Box<dyn Framer>>,
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("request", &self.request)
            .field("next_framer", &self.next_framer.is_some())
            .finish()
    }
}

/// The stream-to-request parser plugged into a session.
///
/// `decode` is called repeatedly by the socket session's receive loop
/// (§4.C) until it returns `Ok(None)`, meaning "not enough data yet";
/// everything it doesn't consume from `buf` stays there.
pub trait Framer: Send {
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, ProtocolError>;
}

/// Creates one [`Framer`] per accepted connection (§6 framer factory
/// interface). Called exactly once per new session.
pub trait FramerFactory: Send + Sync {
    fn create(&self, remote: SocketAddr) -> Box<dyn Framer>;
}

/// Adapts a plain closure into a [`FramerFactory`], the common case where
/// an application just wants `Framer::default()` per connection.
pub struct FnFramerFactory<F>(pub F)
where
    F: Fn(SocketAddr) -> Box<dyn Framer> + Send + Sync;

impl<F> FramerFactory for FnFramerFactory<F>
where
    F: Fn(SocketAddr) -> Box<dyn Framer> + Send + Sync,
{
    fn create(&self, remote: SocketAddr) -> Box<dyn Framer> {
        (self.0)(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_line_splits_key_and_payload() {
        let req = Request::from_line(b"ECHO hello world");
        assert_eq!(req.key, "ECHO");
        assert_eq!(req.payload, Bytes::from_static(b"hello world"));
    }

    #[test]
    fn request_from_line_handles_empty_frame() {
        let req = Request::from_line(b"");
        assert_eq!(req.key, "");
        assert_eq!(req.payload, Bytes::new());
    }

    #[test]
    fn request_from_line_handles_key_only() {
        let req = Request::from_line(b"PING");
        assert_eq!(req.key, "PING");
        assert_eq!(req.payload, Bytes::new());
    }
}
