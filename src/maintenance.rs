//! Background maintenance loops (§4.E, §6): idle session sweeping,
//! session-snapshot publishing, and periodic server-state collection.
//!
//! Each loop is a plain `tokio::time::interval` task, cancelled through
//! the server's `CancellationToken` rather than an explicit stop flag
//! (§9 design note: maintenance as scheduled tasks, never a spin loop).

use crate::config::{ListenerConfig, ServerConfig};
use crate::framer::FramerFactory;
use crate::server::ServerCore;
use crate::session::{CloseReason, ServerHandler};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A point-in-time snapshot of server health, published via `ArcSwap` so
/// readers (e.g. a `/status` endpoint an application wires up) never
/// block the collector (§4.F `ServerState`).
#[derive(Debug, Clone)]
pub struct ServerState {
    pub collected_at: Instant,
    pub name: String,
    pub started_at: Option<Instant>,
    pub is_running: bool,
    pub total_connections: u32,
    pub current_connections: usize,
    pub max_connections: u32,
    pub total_handled_requests: usize,
    pub requests_per_second: f64,
    pub listeners: Vec<ListenerConfig>,
}

/// Runs the idle-session sweep: every `clear_idle_session_interval`,
/// closes every session that has been idle past `idle_session_timeout`
/// (§4.E). Skips a tick entirely rather than queueing up if the previous
/// sweep is still catching up on a very large session count.
pub async fn run_idle_sweep<H: ServerHandler, Fa: FramerFactory + 'static>(
    server: Arc<ServerCore<H, Fa>>,
    config: ServerConfig,
) {
    if !config.clear_idle_session || config.idle_session_timeout.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(config.clear_idle_session_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let cancel = server.cancellation().clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let use_snapshot = !config.disable_session_snapshot;
                let idle = server.sessions().idle_sessions(use_snapshot, Instant::now(), config.idle_session_timeout);
                if !idle.is_empty() {
                    debug!(count = idle.len(), "closing idle sessions");
                }
                for session in idle {
                    session.close(CloseReason::TimeOut);
                }
            }
        }
    }
}

/// Publishes a [`ServerState`] snapshot every `session_snapshot_interval`
/// (§4.E, §4.F), or never if `disable_session_snapshot` is set.
pub async fn run_state_collector<H: ServerHandler, Fa: FramerFactory + 'static>(
    server: Arc<ServerCore<H, Fa>>,
    config: ServerConfig,
    published: Arc<ArcSwap<ServerState>>,
) {
    if config.disable_session_snapshot {
        return;
    }

    let mut ticker = tokio::time::interval(config.session_snapshot_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let cancel = server.cancellation().clone();
    let mut last_collected: Option<(Instant, usize)> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                server.sessions().publish_snapshot();

                let now = Instant::now();
                let total_handled = server.total_handled_requests();
                let (prev_time, prev_handled) = last_collected
                    .unwrap_or_else(|| (server.started_at().unwrap_or(now), 0));
                let elapsed = now.saturating_duration_since(prev_time).as_secs_f64();
                let rps = if elapsed > 0.0 {
                    (total_handled.saturating_sub(prev_handled)) as f64 / elapsed
                } else {
                    0.0
                };
                last_collected = Some((now, total_handled));

                let state = ServerState {
                    collected_at: now,
                    name: server.name().to_string(),
                    started_at: server.started_at(),
                    is_running: server.is_running(),
                    total_connections: server.total_connections(),
                    current_connections: server.sessions().len(),
                    max_connections: config.max_connection_number,
                    total_handled_requests: total_handled,
                    requests_per_second: rps,
                    listeners: server.listeners().unwrap_or_default(),
                };
                published.store(Arc::new(state));
            }
        }
    }
}

/// Spawns both maintenance loops for a started server, returning their
/// join handles so a caller that wants a clean shutdown can await them
/// after `stop()` cancels the shared token.
pub fn spawn<H: ServerHandler, Fa: FramerFactory + 'static>(
    server: Arc<ServerCore<H, Fa>>,
    config: ServerConfig,
    published_state: Arc<ArcSwap<ServerState>>,
) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let idle_server = server.clone();
    let idle_config = config.clone();
    let idle_handle = tokio::spawn(async move {
        run_idle_sweep(idle_server, idle_config).await;
    });

    let state_handle = tokio::spawn(async move {
        run_state_collector(server, config, published_state).await;
    });

    (idle_handle, state_handle)
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            collected_at: Instant::now(),
            name: String::new(),
            started_at: None,
            is_running: false,
            total_connections: 0,
            current_connections: 0,
            max_connections: 0,
            total_handled_requests: 0,
            requests_per_second: 0.0,
            listeners: Vec::new(),
        }
    }
}
