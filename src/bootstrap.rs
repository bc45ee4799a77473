//! Process-wide bootstrap (§6): brings up every configured server
//! together and reports one aggregate outcome.

use crate::framer::FramerFactory;
use crate::server::{ServerCore, StartOutcome};
use crate::session::ServerHandler;
use std::sync::Arc;

/// Aggregate result of [`Bootstrap::start`] across every managed server
/// (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Success,
    PartialSuccess,
    Failed,
    NoServers,
}

/// Owns a set of already-constructed [`ServerCore`]s and starts/stops
/// them as one unit. Each server may have its own handler and framer
/// factory types, so this holds a homogeneous collection of one concrete
/// `ServerCore<H, Fa>` — a process hosting multiple distinct protocols
/// constructs one `Bootstrap` per protocol, matching how the setup
/// sequence in §6 is scoped per server anyway.
pub struct Bootstrap<H: ServerHandler, Fa: FramerFactory + 'static> {
    servers: Vec<Arc<ServerCore<H, Fa>>>,
}

impl<H: ServerHandler, Fa: FramerFactory + 'static> Bootstrap<H, Fa> {
    pub fn new() -> Self {
        Self { servers: Vec::new() }
    }

    pub fn add(&mut self, server: Arc<ServerCore<H, Fa>>) -> &mut Self {
        self.servers.push(server);
        self
    }

    pub fn servers(&self) -> &[Arc<ServerCore<H, Fa>>] {
        &self.servers
    }

    /// Starts every managed server (§6). A single failed server does not
    /// stop the others from starting; the aggregate outcome tells the
    /// caller whether everything, nothing, or only some of it came up.
    pub async fn start(&self) -> BootstrapOutcome {
        if self.servers.is_empty() {
            return BootstrapOutcome::NoServers;
        }

        let mut succeeded = 0;
        let mut partial = 0;
        let mut failed = 0;

        for server in &self.servers {
            match server.start().await {
                Ok(StartOutcome::Success) => succeeded += 1,
                Ok(StartOutcome::PartialSuccess) => partial += 1,
                Ok(StartOutcome::Failed) | Err(_) => failed += 1,
            }
        }

        if failed == self.servers.len() {
            BootstrapOutcome::Failed
        } else if partial > 0 || failed > 0 {
            BootstrapOutcome::PartialSuccess
        } else if succeeded == self.servers.len() {
            BootstrapOutcome::Success
        } else {
            BootstrapOutcome::PartialSuccess
        }
    }

    pub async fn stop(&self) {
        for server in &self.servers {
            server.stop().await;
        }
    }
}

impl<H: ServerHandler, Fa: FramerFactory + 'static> Default for Bootstrap<H, Fa> {
    fn default() -> Self {
        Self::new()
    }
}
