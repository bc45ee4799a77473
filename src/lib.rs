//! An extensible, session-oriented TCP server framework.
//!
//! A server accepts connections, hands each one to a pluggable
//! [`framer::Framer`] that turns the byte stream into discrete requests,
//! and dispatches each request by key through a [`command::CommandRegistry`].
//! Everything above the socket — session bookkeeping, idle sweeping,
//! connection filtering, lifecycle callbacks — is provided so an
//! application only has to write framers and command handlers.
//!
//! See [`server::ServerCore`] for the entry point.
//!
//! # Example
//!
//! ```rust,no_run
//! use sessionforge::{CommandRegistry, ConnectionFilterChain, ServerConfig, ServerCore, SessionId};
//! use sessionforge::framer::{FnFramerFactory, TerminatorFramer};
//! use sessionforge::session::ServerHandler;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl ServerHandler for Echo {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig { name: "echo".into(), ..Default::default() };
//!     let commands = CommandRegistry::builder().build();
//!     let filters = ConnectionFilterChain::new();
//!     let factory = FnFramerFactory(|_remote| -> Box<dyn sessionforge::Framer> {
//!         Box::new(TerminatorFramer::crlf())
//!     });
//!
//!     let server =
//!         Arc::new(ServerCore::new(config, Echo, factory, commands, filters)?);
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod framer;
pub mod maintenance;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod thread_pool;

pub use bootstrap::{Bootstrap, BootstrapOutcome};
pub use command::{
    CommandContext, CommandFilter, CommandHandler, CommandLoader, CommandRegistry, CommandUpdate,
};
pub use config::{BindSpec, ListenerConfig, ServerConfig, SocketMode, WorkerPoolConfig};
pub use error::{Error, Result, SetupError};
pub use filter::{ConnectionFilter, ConnectionFilterChain};
pub use framer::{
    BeginEndMarkFramer, Decoded, FixedPrefixLengthFramer, FixedSizeFramer, Framer, FramerFactory,
    ProtocolError, Request, TerminatorFramer,
};
pub use maintenance::ServerState;
pub use queue::SendQueue;
pub use registry::SessionRegistry;
pub use server::{ServerCore, StartOutcome};
pub use session::{CloseReason, RequestHandling, ServerHandler, Session, SessionId, SocketSession};
