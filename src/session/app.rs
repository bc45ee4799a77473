//! The application-visible session (§3, §4.D): identity, timestamps, user
//! items, and the receive-loop that drives a [`crate::framer::Framer`]
//! into the command dispatcher.

use crate::command::{CommandContext, CommandRegistry};
use crate::config::ServerConfig;
use crate::error::Error;
use crate::framer::{Framer, Request};
use crate::session::socket::SocketSession;
use crate::session::{CloseReason, SessionId};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Maximum number of entries in a session's user item map (§3 invariant).
pub const MAX_USER_ITEMS: usize = 10;

/// The application-visible session object (§3, §4.D).
///
/// One `Session` exclusively owns one [`SocketSession`]; it is destroyed
/// (dropped) once the socket closes and the owning task returns.
pub struct Session {
    pub socket: SocketSession,
    start_time: Instant,
    last_active: Mutex<Instant>,
    current_command: Mutex<Option<String>>,
    previous_command: Mutex<Option<String>>,
    user_items: Mutex<std::collections::HashMap<String, String>>,
    charset: String,
    append_newline_on_send_line: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        send_queue_capacity: usize,
        append_newline_on_send_line: bool,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            socket: SocketSession::new(id, remote_addr, send_queue_capacity),
            start_time: now,
            last_active: Mutex::new(now),
            current_command: Mutex::new(None),
            previous_command: Mutex::new(None),
            user_items: Mutex::new(std::collections::HashMap::new()),
            charset: "UTF-8".to_string(),
            append_newline_on_send_line,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.socket.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.socket.remote_addr
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn current_command(&self) -> Option<String> {
        self.current_command.lock().clone()
    }

    pub fn previous_command(&self) -> Option<String> {
        self.previous_command.lock().clone()
    }

    fn set_current_command(&self, key: Option<String>) {
        *self.current_command.lock() = key;
    }

    fn promote_current_to_previous(&self) {
        let mut current = self.current_command.lock();
        if let Some(key) = current.take() {
            *self.previous_command.lock() = Some(key);
        }
    }

    /// Sets a user item, capped at [`MAX_USER_ITEMS`] distinct keys (§3
    /// invariant). Returns `false` if the map is full and `key` is new.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let mut items = self.user_items.lock();
        if !items.contains_key(&key) && items.len() >= MAX_USER_ITEMS {
            return false;
        }
        items.insert(key, value.into());
        true
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.user_items.lock().get(key).cloned()
    }

    /// Enqueues raw bytes for sending (non-blocking), updating
    /// `last_active_time` on success (§4.C).
    pub fn try_send_bytes(&self, data: Bytes) -> Result<(), crate::session::socket::TrySendError> {
        self.socket.try_send(data)?;
        self.touch();
        Ok(())
    }

    /// Transcodes `text` via the session's charset (UTF-8 is the only
    /// encoding this framework implements natively) and sends it,
    /// appending a newline when configured and not in datagram mode
    /// (§4.D).
    pub fn send_line(&self, text: &str) -> Result<(), crate::session::socket::TrySendError> {
        let mut buf = String::with_capacity(text.len() + 2);
        buf.push_str(text);
        if self.append_newline_on_send_line {
            buf.push_str("\r\n");
        }
        self.try_send_bytes(Bytes::from(buf.into_bytes()))
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.socket.close(reason)
    }
}

/// Lifecycle hooks an application provides (§4.D, §9 design note:
/// "inheritance hierarchies collapse into composition... lifecycle hooks
/// become a vtable/interface the application provides").
///
/// Every method has a default no-op/continue implementation, so an
/// application only overrides what it cares about.
#[async_trait::async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Called once every listener is bound and accepting, before the
    /// maintenance timers start (§4.E `start()` sequence).
    async fn on_startup(&self) {}

    /// Called once, immediately after the session is registered, before
    /// `on_session_started` (§4.D).
    async fn on_init(&self, _session: &Arc<Session>) {}

    /// Called once the session is fully wired up and ready to receive
    /// requests (§4.D).
    async fn on_session_started(&self, _session: &Arc<Session>) {}

    /// Called once, after the session has been removed from the registry
    /// (§4.E).
    async fn on_session_closed(&self, _session: &Arc<Session>, _reason: CloseReason) {}

    /// Raw-data hook (§4.C): return `false` to discard a just-received
    /// chunk before it reaches the framer.
    fn on_raw_data(&self, _session: &Arc<Session>, _data: &[u8]) -> bool {
        true
    }

    /// Installing a raw request handler bypasses the command registry
    /// entirely for every request (§4.F step 2). Return
    /// [`RequestHandling::Handled`] to take over dispatch yourself.
    async fn on_new_request_received(
        &self,
        _session: &Arc<Session>,
        _request: &Request,
    ) -> RequestHandling {
        RequestHandling::Continue
    }

    /// No handler matched the request's key (§4.D). The default behavior
    /// mirrors the text-oriented reference implementation's reply.
    async fn handle_unknown_request(&self, session: &Arc<Session>, request: &Request) {
        let _ = session.send_line(&format!("Unknown request: {}", request.key));
    }

    /// A command handler or filter returned an error (§4.D, §7). The
    /// default logs and lets the caller close the session.
    async fn handle_exception(&self, session: &Arc<Session>, error: &Error) {
        warn!(session = %session.id(), error = %error, "command execution failed");
    }
}

/// Result of [`ServerHandler::on_new_request_received`].
pub enum RequestHandling {
    Continue,
    Handled,
}

/// Per-session dispatch-loop context.
///
/// `registry` is the currently-published command table (an `ArcSwap`
/// snapshot is already captured by the caller before this runs — see
/// `CommandRegistry::current`), `max_request_length` / `receive_buffer_size`
/// come from `ServerConfig`.
pub struct RunConfig<'a, H: ServerHandler> {
    pub handler: &'a Arc<H>,
    pub registry: &'a CommandRegistry,
    pub server_config: &'a ServerConfig,
    pub total_handled_requests: &'a AtomicUsize,
}

/// Drives one accepted `TcpStream` through its full life: receive loop,
/// framing, dispatch, and the send pump, until the socket closes for any
/// reason. Returns the [`CloseReason`] so the caller (the server's accept
/// loop) can perform deregistration and fire `on_session_closed`.
pub async fn run<H: ServerHandler>(
    session: Arc<Session>,
    mut stream: TcpStream,
    mut framer: Box<dyn Framer>,
    cfg: RunConfig<'_, H>,
) -> CloseReason {
    cfg.handler.on_init(&session).await;
    cfg.handler.on_session_started(&session).await;

    let mut recv_buf = BytesMut::with_capacity(cfg.server_config.receive_buffer_size);
    let mut send_scratch: Vec<Bytes> = Vec::new();
    let cancel = session.socket.cancellation().clone();

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break session.socket.close_reason().unwrap_or(CloseReason::Unknown);
            }

            _ = session.socket.send_queue().notified() => {
                if let Err(reason) = drain_send_queue(&mut stream, &session, &mut send_scratch, cfg.server_config.sync_send).await {
                    session.close(reason);
                    continue;
                }
            }

            read_result = stream.read_buf(&mut recv_buf) => {
                match read_result {
                    Ok(0) => {
                        break close_with(&session, CloseReason::ClientClosing);
                    }
                    Ok(n) => {
                        let _ = n;
                        session.touch();

                        if !cfg.handler.on_raw_data(&session, &recv_buf) {
                            recv_buf.clear();
                            continue;
                        }

                        match drain_requests(&session, &mut framer, &mut recv_buf, &cfg).await {
                            Ok(Some(reason)) => break reason,
                            Ok(None) => {}
                            Err(reason) => break reason,
                        }

                        if recv_buf.len() >= cfg.server_config.max_request_length {
                            warn!(
                                session = %session.id(),
                                retained = recv_buf.len(),
                                max = cfg.server_config.max_request_length,
                                "oversize request, closing session"
                            );
                            break close_with(&session, CloseReason::ServerClosing);
                        }
                    }
                    Err(err) => {
                        if cfg.server_config.log_all_socket_exception || !is_ignorable_io_error(&err) {
                            warn!(session = %session.id(), error = %err, "socket receive error");
                        }
                        break close_with(&session, CloseReason::SocketError);
                    }
                }
            }
        }
    };

    // Best-effort final flush for a graceful shutdown: drain whatever is
    // still queued before the stream is dropped.
    let _ = drain_send_queue(&mut stream, &session, &mut send_scratch, true).await;
    let _ = stream.shutdown().await;
    reason
}

fn close_with(session: &Arc<Session>, reason: CloseReason) -> CloseReason {
    session.close(reason);
    session.socket.close_reason().unwrap_or(reason)
}

/// Repeatedly decodes requests out of `recv_buf`, dispatching each one
/// through the raw-request hook or the command registry (§4.C, §4.F).
/// Returns `Ok(Some(reason))` if dispatch caused the session to close.
async fn drain_requests<H: ServerHandler>(
    session: &Arc<Session>,
    framer: &mut Box<dyn Framer>,
    recv_buf: &mut BytesMut,
    cfg: &RunConfig<'_, H>,
) -> Result<Option<CloseReason>, CloseReason> {
    loop {
        let decoded = match framer.decode(recv_buf) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(session = %session.id(), error = %err, "protocol error");
                return Err(close_with(session, CloseReason::ProtocolError));
            }
        };

        if let Some(next) = decoded.next_framer {
            *framer = next;
        }

        debug!(session = %session.id(), key = %decoded.request.key, "request received");
        if let Some(reason) = dispatch(session, decoded.request, cfg).await {
            return Ok(Some(reason));
        }

        if !session.is_connected() {
            return Ok(Some(session.socket.close_reason().unwrap_or(CloseReason::Unknown)));
        }
    }
}

/// Single dispatch per §4.F: sets `current_command`, runs the raw hook or
/// registry lookup + filter chain, updates bookkeeping, and returns
/// `Some(reason)` only if the command handler itself closed the session
/// via an unrecoverable application error.
async fn dispatch<H: ServerHandler>(
    session: &Arc<Session>,
    request: Request,
    cfg: &RunConfig<'_, H>,
) -> Option<CloseReason> {
    session.set_current_command(Some(request.key.clone()));

    match cfg.handler.on_new_request_received(session, &request).await {
        RequestHandling::Handled => {
            finish_dispatch(session, cfg);
            return None;
        }
        RequestHandling::Continue => {}
    }

    let Some(entry) = cfg.registry.lookup(&request.key) else {
        cfg.handler.handle_unknown_request(session, &request).await;
        finish_dispatch(session, cfg);
        return None;
    };

    let mut ctx = CommandContext::new(session.clone(), request);
    if let Err(err) = entry.invoke(&mut ctx).await {
        cfg.handler.handle_exception(session, &err).await;
        finish_dispatch(session, cfg);
        session.close(CloseReason::ApplicationError);
        return Some(CloseReason::ApplicationError);
    }

    session.promote_current_to_previous();
    if cfg.server_config.log_command {
        info!(session = %session.id(), command = %ctx.request.key, "command dispatched");
    }
    finish_dispatch(session, cfg);
    None
}

fn finish_dispatch<H: ServerHandler>(session: &Arc<Session>, cfg: &RunConfig<'_, H>) {
    session.touch();
    cfg.total_handled_requests.fetch_add(1, Ordering::Relaxed);
}

/// Drains whatever is currently queued to the socket (§4.C send pump).
/// `sync` selects between a per-segment `write_all` (the "synchronous"
/// mode) and a single vectored write of the whole batch (the
/// "asynchronous"/scatter-gather mode).
async fn drain_send_queue(
    stream: &mut TcpStream,
    session: &Arc<Session>,
    scratch: &mut Vec<Bytes>,
    sync: bool,
) -> Result<(), CloseReason> {
    scratch.clear();
    if !session.socket.send_queue().try_dequeue(scratch) {
        return Ok(());
    }

    let result = if sync {
        write_sequentially(stream, scratch).await
    } else {
        write_vectored_batch(stream, scratch).await
    };

    result.map_err(|err| {
        if is_ignorable_io_error(&err) {
            CloseReason::SocketError
        } else {
            warn!(session = %session.id(), error = %err, "socket send error");
            CloseReason::SocketError
        }
    })
}

async fn write_sequentially(stream: &mut TcpStream, segments: &[Bytes]) -> std::io::Result<()> {
    for segment in segments {
        stream.write_all(segment).await?;
    }
    stream.flush().await
}

async fn write_vectored_batch(stream: &mut TcpStream, segments: &[Bytes]) -> std::io::Result<()> {
    let mut remaining: Vec<Bytes> = segments.to_vec();
    while !remaining.is_empty() {
        let slices: Vec<std::io::IoSlice<'_>> =
            remaining.iter().map(|b| std::io::IoSlice::new(b)).collect();
        let mut written = stream.write_vectored(&slices).await?;
        while written > 0 {
            let front_len = remaining[0].len();
            if written >= front_len {
                written -= front_len;
                remaining.remove(0);
            } else {
                remaining[0] = remaining[0].slice(written..);
                written = 0;
            }
        }
    }
    stream.flush().await
}

/// Error codes considered routine connection teardown rather than faults
/// (§4.C, §7): connection reset/aborted/interrupted or a peer shutdown.
fn is_ignorable_io_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionReset | ConnectionAborted | Interrupted | BrokenPipe | NotConnected
    )
}
