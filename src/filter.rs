//! Connection filter chain (§4.E): consulted at accept time, before a
//! session is ever constructed.

use async_trait::async_trait;
use std::net::SocketAddr;

/// A single accept-time gate. Filters run in registration order; the
/// first one to deny a connection short-circuits the rest and the
/// connection is dropped without a session ever being created (§4.E).
#[async_trait]
pub trait ConnectionFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn allow_connect(&self, remote: SocketAddr) -> bool;
}

/// An ordered list of [`ConnectionFilter`]s evaluated as a single unit.
#[derive(Default)]
pub struct ConnectionFilterChain {
    filters: Vec<Box<dyn ConnectionFilter>>,
}

impl ConnectionFilterChain {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn push(&mut self, filter: impl ConnectionFilter + 'static) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Returns `Ok(())` if every filter allows the connection, or the
    /// name of the first filter that denied it.
    pub async fn evaluate(&self, remote: SocketAddr) -> Result<(), &str> {
        for filter in &self.filters {
            if !filter.allow_connect(remote).await {
                return Err(filter.name());
            }
        }
        Ok(())
    }
}
