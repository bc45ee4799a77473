//! Server core (§4.E, §6, §7): the accept loop, lifecycle, and wiring
//! between every other collaborator.

use crate::command::CommandRegistry;
use crate::config::{ListenerConfig, ServerConfig};
use crate::error::SetupError;
use crate::filter::ConnectionFilterChain;
use crate::framer::FramerFactory;
use crate::maintenance::ServerState;
use crate::registry::SessionRegistry;
use crate::session::{CloseReason, RunConfig, ServerHandler, Session, SessionId};
use crate::thread_pool;
use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of [`ServerCore::start`] across every configured listener (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Success,
    PartialSuccess,
    Failed,
}

struct Counters {
    total_connections: AtomicU32,
    total_handled_requests: AtomicUsize,
}

/// The running server: owns the session registry, the command registry,
/// the connection filter chain, and one task per bound listener.
///
/// Generic over the application's [`ServerHandler`] and [`FramerFactory`]
/// rather than dyn-dispatched (§9 design note: "model as two type
/// parameters on the server"), since a process hosts one handler
/// implementation per server, never a heterogeneous collection of them.
pub struct ServerCore<H: ServerHandler, Fa: FramerFactory> {
    name: String,
    config: ServerConfig,
    handler: Arc<H>,
    framer_factory: Arc<Fa>,
    commands: Arc<CommandRegistry>,
    connection_filters: ConnectionFilterChain,
    sessions: Arc<SessionRegistry>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    running: AtomicBool,
    started_at: parking_lot::Mutex<Option<Instant>>,
    next_session_seq: AtomicU32,
    state: Arc<ArcSwap<ServerState>>,
    maintenance: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Listener configs with `endpoint` rewritten to the address the OS
    /// actually bound, populated by `start()`. Empty before the first
    /// `start()` call.
    bound_listeners: parking_lot::Mutex<Vec<ListenerConfig>>,
}

impl<H: ServerHandler, Fa: FramerFactory + 'static> ServerCore<H, Fa> {
    /// Setup sequence (§6): validate config, apply the process-wide worker
    /// pool tuning (idempotent — the first server in the process wins),
    /// resolve listeners, build the command registry. Does not bind any
    /// socket yet — that happens in `start`.
    pub fn new(
        config: ServerConfig,
        handler: H,
        framer_factory: Fa,
        commands: CommandRegistry,
        connection_filters: ConnectionFilterChain,
    ) -> Result<Self, SetupError> {
        let config = config.validate_and_normalize()?;
        let name = config.name.clone();
        thread_pool::apply(config.worker_pool);
        Ok(Self {
            name,
            config,
            handler: Arc::new(handler),
            framer_factory: Arc::new(framer_factory),
            commands: Arc::new(commands),
            connection_filters,
            sessions: Arc::new(SessionRegistry::new()),
            counters: Arc::new(Counters {
                total_connections: AtomicU32::new(0),
                total_handled_requests: AtomicUsize::new(0),
            }),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            started_at: parking_lot::Mutex::new(None),
            next_session_seq: AtomicU32::new(1),
            state: Arc::new(ArcSwap::from_pointee(ServerState::default())),
            maintenance: parking_lot::Mutex::new(Vec::new()),
            bound_listeners: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    pub fn total_connections(&self) -> u32 {
        self.counters.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_handled_requests(&self) -> usize {
        self.counters.total_handled_requests.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    /// Last published [`ServerState`] snapshot (§4.I). Reflects defaults
    /// until the first collection tick fires after `start()`.
    pub fn state(&self) -> Arc<ServerState> {
        self.state.load_full()
    }

    /// Binds every configured listener and spawns one accept loop per
    /// listener (§6). Partial bind failure across multiple listeners is
    /// reported rather than treated as fully fatal, matching §6's
    /// `PartialSuccess` outcome.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, SetupError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SetupError::AlreadyRunning);
        }

        let listeners = self.config.listeners()?;
        let mut bound = Vec::new();
        let mut failures = Vec::new();

        for mut listener_cfg in listeners {
            match TcpListener::bind(listener_cfg.endpoint).await {
                Ok(listener) => {
                    // `listener_cfg.endpoint` may have asked for an
                    // ephemeral port (`:0`); record what the OS actually
                    // bound so `listeners()` reports a connectable address.
                    if let Ok(actual) = listener.local_addr() {
                        listener_cfg.endpoint = actual;
                    }
                    bound.push((listener_cfg, listener));
                }
                Err(source) => {
                    warn!(endpoint = %listener_cfg.endpoint, error = %source, "listener bind failed");
                    failures.push(SetupError::ListenerBind { endpoint: listener_cfg.endpoint, source });
                }
            }
        }

        if bound.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Ok(StartOutcome::Failed);
        }

        *self.started_at.lock() = Some(Instant::now());
        *self.bound_listeners.lock() = bound.iter().map(|(cfg, _)| cfg.clone()).collect();

        for (listener_cfg, _listener) in bound.iter() {
            info!(name = %self.name, endpoint = %listener_cfg.endpoint, "listener bound");
        }

        for (_, listener) in bound {
            let server = self.clone();
            tokio::spawn(async move {
                server.accept_loop(listener).await;
            });
        }

        self.handler.on_startup().await;

        let (idle_handle, state_handle) =
            crate::maintenance::spawn(self.clone(), self.config.clone(), self.state.clone());
        *self.maintenance.lock() = vec![idle_handle, state_handle];

        if failures.is_empty() {
            Ok(StartOutcome::Success)
        } else {
            Ok(StartOutcome::PartialSuccess)
        }
    }

    /// Stops accepting new connections, closes every live session with
    /// `ServerShutdown`, then stops the maintenance timers (§6, §5
    /// resource lifecycle).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        for session in self.sessions.get_all_sessions(false) {
            session.close(CloseReason::ServerShutdown);
        }
        let handles: Vec<_> = self.maintenance.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => self.clone().handle_accept(stream, remote),
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }
    }

    fn handle_accept(self: Arc<Self>, stream: tokio::net::TcpStream, remote: SocketAddr) {
        tokio::spawn(async move {
            self.serve_one(stream, remote).await;
        });
    }

    async fn serve_one(self: Arc<Self>, stream: tokio::net::TcpStream, remote: SocketAddr) {
        if self.sessions.len() as u32 >= self.config.max_connection_number {
            debug!(remote = %remote, "rejecting connection: at capacity");
            return;
        }

        if let Err(filter_name) = self.connection_filters.evaluate(remote).await {
            debug!(remote = %remote, filter = filter_name, "connection rejected by filter");
            return;
        }

        let _ = stream.set_nodelay(true);

        let seq = self.next_session_seq.fetch_add(1, Ordering::Relaxed);
        let id = SessionId::new(format!("{remote}-{seq}"));

        let append_newline = self.config.append_newline_on_send_line
            && self.config.mode == crate::config::SocketMode::Tcp;
        let session = Session::new(id.clone(), remote, self.config.sending_queue_size, append_newline);

        if !self.sessions.insert(session.clone()) {
            warn!(session = %id, "session id collision at accept, dropping connection");
            return;
        }

        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
        if self.config.log_basic_session_activity {
            info!(session = %id, remote = %remote, "session connected");
        }

        let framer = self.framer_factory.create(remote);
        let run_cfg = RunConfig {
            handler: &self.handler,
            registry: &self.commands,
            server_config: &self.config,
            total_handled_requests: &self.counters.total_handled_requests,
        };

        let reason = crate::session::app::run(session.clone(), stream, framer, run_cfg).await;

        self.sessions.remove(&id);
        if self.config.log_basic_session_activity && !reason.is_routine() {
            warn!(session = %id, reason = %reason, "session closed");
        } else if self.config.log_basic_session_activity {
            info!(session = %id, reason = %reason, "session closed");
        }
        self.handler.on_session_closed(&session, reason).await;
    }

    /// Sends `payload` to every session matching `pred` (§4.F broadcast
    /// helper, SPEC_FULL §10.6). Reads the session snapshot when enabled,
    /// the live registry otherwise (§4.I).
    pub fn broadcast(&self, payload: bytes::Bytes, pred: impl FnMut(&Session) -> bool) {
        let use_snapshot = !self.config.disable_session_snapshot;
        for session in self.sessions.get_sessions(use_snapshot, pred) {
            let _ = session.try_send_bytes(payload.clone());
        }
    }

    /// Every connected session (§4.F `get_all_sessions`), from the
    /// snapshot when enabled, the live registry otherwise (§4.I).
    pub fn get_all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.get_all_sessions(!self.config.disable_session_snapshot)
    }

    /// Sessions matching `pred` (§4.F `get_sessions(pred)`), from the
    /// snapshot when enabled, the live registry otherwise (§4.I).
    pub fn get_sessions(&self, pred: impl FnMut(&Session) -> bool) -> Vec<Arc<Session>> {
        self.sessions.get_sessions(!self.config.disable_session_snapshot, pred)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Configured listeners, with `endpoint` reflecting the OS-assigned
    /// address once `start()` has bound them (e.g. an ephemeral `:0` port
    /// resolves to the actual port). Before the first `start()` this
    /// returns the as-configured addresses.
    pub fn listeners(&self) -> Result<Vec<ListenerConfig>, SetupError> {
        let bound = self.bound_listeners.lock();
        if !bound.is_empty() {
            return Ok(bound.clone());
        }
        drop(bound);
        self.config.listeners()
    }
}
