//! Server configuration surface (§3, §6).
//!
//! These are plain, already-constructed values: loading them from a file
//! format is an external collaborator's job (§1 explicitly keeps config
//! *loading* out of scope), so there is no parser here, only validation of
//! the invariants the runtime relies on.

use crate::error::SetupError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Minimum accepted send-queue capacity (§3, §8 boundary behavior).
pub const MIN_SEND_QUEUE_CAPACITY: usize = 3;

/// Minimum accepted session-snapshot interval (§8 boundary behavior).
pub const MIN_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a listener speaks stream (TCP) or datagram (UDP) framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketMode {
    #[default]
    Tcp,
    Udp,
}

/// TLS mode for one listener. The framework only carries the *name*: actual
/// TLS termination is an external collaborator (§1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Security {
    #[default]
    None,
    Named(String),
}

impl Security {
    pub fn is_secure(&self) -> bool {
        !matches!(self, Security::None)
    }
}

/// Certificate resolution for secure listeners. Resolution itself (reading
/// the file, querying a certificate store) is an external collaborator;
/// this only records which of the two addressing schemes was requested.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    File { path: String, password: Option<String> },
    StoreThumbprint { thumbprint: String, store_name: String, store_location: String },
}

/// One bind point: address, backlog, and its own security mode.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub endpoint: SocketAddr,
    pub backlog: u32,
    pub security: Security,
}

impl ListenerConfig {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint, backlog: 1024, security: Security::None }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }
}

/// Either a single `ip:port`, or an explicit list of listeners, never both
/// (§6 validation rule).
#[derive(Debug, Clone)]
pub enum BindSpec {
    Single { ip: IpAddr, port: u16 },
    Listeners(Vec<ListenerConfig>),
}

/// Immutable per-server configuration (§3).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub bind: BindSpec,
    pub mode: SocketMode,
    pub max_connection_number: u32,
    pub receive_buffer_size: usize,
    pub max_request_length: usize,
    pub sending_queue_size: usize,
    pub idle_session_timeout: Duration,
    pub clear_idle_session: bool,
    pub clear_idle_session_interval: Duration,
    pub disable_session_snapshot: bool,
    pub session_snapshot_interval: Duration,
    pub log_command: bool,
    pub log_basic_session_activity: bool,
    pub log_all_socket_exception: bool,
    pub certificate: Option<CertificateSource>,
    pub sync_send: bool,
    pub worker_pool: WorkerPoolConfig,
    /// Whether `Session::send_line` appends a newline (§4.D). Independent of
    /// `mode`: datagram sessions never append one regardless of this flag.
    pub append_newline_on_send_line: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "server".to_string(),
            bind: BindSpec::Single { ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 0 },
            mode: SocketMode::Tcp,
            max_connection_number: 10_000,
            receive_buffer_size: 4 * 1024,
            max_request_length: 8 * 1024,
            sending_queue_size: 64,
            idle_session_timeout: Duration::from_secs(0),
            clear_idle_session: false,
            clear_idle_session_interval: Duration::from_secs(120),
            disable_session_snapshot: false,
            session_snapshot_interval: Duration::from_secs(5),
            log_command: false,
            log_basic_session_activity: true,
            log_all_socket_exception: false,
            certificate: None,
            sync_send: false,
            worker_pool: WorkerPoolConfig::default(),
            append_newline_on_send_line: true,
        }
    }
}

impl ServerConfig {
    /// Validates and normalizes the invariants from §3/§6/§8: the send
    /// queue capacity and snapshot interval are clamped up rather than
    /// rejected, everything else is a hard error.
    pub fn validate_and_normalize(mut self) -> std::result::Result<Self, SetupError> {
        if self.sending_queue_size < MIN_SEND_QUEUE_CAPACITY {
            self.sending_queue_size = MIN_SEND_QUEUE_CAPACITY;
        }
        if !self.disable_session_snapshot && self.session_snapshot_interval < MIN_SNAPSHOT_INTERVAL
        {
            self.session_snapshot_interval = MIN_SNAPSHOT_INTERVAL;
        }
        if self.receive_buffer_size == 0 {
            return Err(SetupError::InvalidConfig("receive_buffer_size must be > 0".into()));
        }
        if self.max_request_length == 0 {
            return Err(SetupError::InvalidConfig("max_request_length must be > 0".into()));
        }
        if self.max_connection_number == 0 {
            return Err(SetupError::InvalidConfig("max_connection_number must be > 0".into()));
        }

        let listeners = self.listeners()?;
        for listener in &listeners {
            if listener.security.is_secure() && self.certificate.is_none() {
                return Err(SetupError::MissingCertificate { endpoint: listener.endpoint });
            }
        }

        Ok(self)
    }

    /// Resolves `bind` into a concrete listener list, enforcing the
    /// ip+port XOR listeners rule (§6).
    pub fn listeners(&self) -> std::result::Result<Vec<ListenerConfig>, SetupError> {
        match &self.bind {
            BindSpec::Single { ip, port } => Ok(vec![ListenerConfig::new(SocketAddr::new(*ip, *port))]),
            BindSpec::Listeners(list) => {
                if list.is_empty() {
                    return Err(SetupError::NoListeners);
                }
                Ok(list.clone())
            }
        }
    }
}

/// Process-global worker-thread-pool tuning (§6). Negative values mean
/// "leave default", mirrored here as `None`. This is configured once per
/// process; subsequent servers sharing the process see the first value
/// applied and are told so.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub max_working_threads: Option<u32>,
    pub max_completion_port_threads: Option<u32>,
    pub min_working_threads: Option<u32>,
    pub min_completion_port_threads: Option<u32>,
}
