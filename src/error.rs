//! Error types for the server runtime.
//!
//! Handler and filter code is free to return arbitrary boxed errors (the
//! framework cannot know what an application author's command handlers
//! raise); everything on the setup path, in contrast, has a closed and
//! enumerable set of failure modes and gets a proper `thiserror` enum.

use std::net::SocketAddr;
use thiserror::Error;

/// Error returned by application-supplied collaborators (command handlers,
/// filters, lifecycle hooks). Boxed because the framework cannot constrain
/// the error type an application author's handler crate chooses to use.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Result alias matching [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can occur while building or starting a [`crate::server::ServerCore`].
///
/// Every setup error is terminal for the call that produced it: the server
/// remains uninitialized (or not running) and the caller gets a logged
/// reason, never a panic.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid server config: {0}")]
    InvalidConfig(String),

    #[error("server must be configured with either Ip+Port or a Listeners list, not both")]
    AmbiguousListeners,

    #[error("server has no listeners configured")]
    NoListeners,

    #[error("failed to bind listener {endpoint}: {source}")]
    ListenerBind {
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener {endpoint} requests a secure mode but no certificate was resolved")]
    MissingCertificate { endpoint: SocketAddr },

    #[error("certificate could not be resolved: {0}")]
    CertificateResolution(String),

    #[error("duplicate command name registered: {0}")]
    DuplicateCommand(String),

    #[error("server already running")]
    AlreadyRunning,
}
