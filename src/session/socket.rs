//! The socket session (§4.C): owns the raw connection's send queue and
//! close state. The actual receive/send I/O loop that drives a framer
//! against a live `TcpStream` lives in [`crate::session::app`], which owns
//! this struct alongside the per-session user state.

use crate::queue::SendQueue;
use crate::session::{CloseReason, SessionId};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError {
    #[error("send queue is full")]
    QueueFull,
    #[error("session is not connected")]
    SessionNotConnected,
}

/// One TCP connection's transport-level state (§3, §4.C).
///
/// Cheap to clone via `Arc`; command handlers hold a reference to this (via
/// the owning [`crate::session::app::Session`]) to push outbound data.
#[derive(Debug)]
pub struct SocketSession {
    pub id: SessionId,
    pub remote_addr: SocketAddr,
    send_queue: SendQueue,
    state: AtomicU8,
    close_reason: parking_lot::Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl SocketSession {
    pub fn new(id: SessionId, remote_addr: SocketAddr, send_queue_capacity: usize) -> Self {
        Self {
            id,
            remote_addr,
            send_queue: SendQueue::new(send_queue_capacity),
            state: AtomicU8::new(STATE_OPEN),
            close_reason: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    pub(crate) fn send_queue(&self) -> &SendQueue {
        &self.send_queue
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Non-blocking enqueue of a single segment (§4.C `try_send`).
    pub fn try_send(&self, segment: Bytes) -> Result<(), TrySendError> {
        if !self.is_connected() {
            return Err(TrySendError::SessionNotConnected);
        }
        if self.send_queue.enqueue(segment) {
            Ok(())
        } else {
            Err(TrySendError::QueueFull)
        }
    }

    /// Non-blocking, atomic enqueue of several segments (§4.A).
    pub fn try_send_all(&self, segments: Vec<Bytes>) -> Result<(), TrySendError> {
        if !self.is_connected() {
            return Err(TrySendError::SessionNotConnected);
        }
        if self.send_queue.enqueue_all(segments) {
            Ok(())
        } else {
            Err(TrySendError::QueueFull)
        }
    }

    /// Blocking variant of `try_send`: retries with exponential backoff
    /// until it succeeds or the session disconnects (§4.C, §9 design note
    /// — a cooperative `tokio::time::sleep` backoff rather than a tight
    /// CPU spin).
    pub async fn send(&self, segment: Bytes) {
        let mut backoff = Duration::from_micros(50);
        const MAX_BACKOFF: Duration = Duration::from_millis(50);
        loop {
            if !self.is_connected() {
                return;
            }
            match self.try_send(segment.clone()) {
                Ok(()) => return,
                Err(TrySendError::SessionNotConnected) => return,
                Err(TrySendError::QueueFull) => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// First caller wins; returns whether this call performed the close.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        self.send_queue.close();
        self.cancel.cancel();
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        true
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }
}
