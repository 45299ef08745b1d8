// Transport Traits and Core Types
// Service identity, configuration, addresses, events and errors shared by the peer link

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

// ============================================================================
// SERVICE IDENTITY
// ============================================================================

/// Well-known identifier both peers expect at the head of every frame
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc);

/// Well-known service name, used in logs and by the listener
pub const SERVICE_NAME: &str = "OffPayPayment";

/// Default port the payment service listens on
pub const SERVICE_PORT: u16 = 7373;

/// Detail reported when a failure carries no text of its own
pub const FALLBACK_ERROR_DETAIL: &str = "Connection failed";

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Configuration for the peer transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Address to bind the listening endpoint to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Upper bound on establishing an outbound connection
    pub connect_timeout_ms: u64,
    /// Time an accepted session has to deliver a complete message
    pub read_timeout_ms: u64,
    /// Time a sender waits for the receiver's acknowledgement
    pub ack_timeout_ms: u64,
    /// Pause between a failed accept and the next attempt
    pub accept_backoff_ms: u64,
    /// Largest payload accepted in a single frame
    pub max_message_bytes: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: SERVICE_PORT,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 3_000,
            ack_timeout_ms: 3_000,
            accept_backoff_ms: 2_000,
            max_message_bytes: 1024,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    pub fn with_accept_backoff_ms(mut self, ms: u64) -> Self {
        self.accept_backoff_ms = ms;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    /// "host:port" the listener binds to
    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.bind_address.is_empty() {
            return Err(TransportError::InvalidConfig("bind_address cannot be empty".to_string()));
        }
        if self.max_message_bytes == 0 {
            return Err(TransportError::InvalidConfig("max_message_bytes cannot be 0".to_string()));
        }
        if self.max_message_bytes > u32::MAX as usize {
            return Err(TransportError::InvalidConfig("max_message_bytes exceeds frame limit".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            return Err(TransportError::InvalidConfig("timeouts cannot be 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// PEER ADDRESS
// ============================================================================

/// Network address of a paired peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    /// Create a TCP address
    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// "host:port" form accepted by `TcpStream::connect`
    pub fn socket_string(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(&addr.ip().to_string(), addr.port())
    }
}

impl FromStr for PeerAddress {
    type Err = TransportError;

    /// Parses "host:port", with or without a "tcp://" prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidAddress(s.to_string()))?;
        Ok(Self::tcp(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

// ============================================================================
// CONNECTION ID
// ============================================================================

/// Identifier of a single short-lived session, for log correlation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; 16]);

impl ConnectionId {
    /// Generate a new unique connection ID
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

// ============================================================================
// INBOUND EVENTS
// ============================================================================

/// Events delivered by a running listener
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A complete payment message arrived and was acknowledged
    Received {
        connection_id: ConnectionId,
        from: PeerAddress,
        message: String,
    },

    /// Binding or accepting on the listening endpoint failed; the loop retries
    AcceptFailed { error: TransportError },
}

// ============================================================================
// SEND RESULT
// ============================================================================

/// Proof that a payload reached the peer and was acknowledged
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub connection_id: ConnectionId,
    pub peer: PeerAddress,
    pub bytes_written: usize,
    pub elapsed: Duration,
}

/// Completion of an outbound send running on its own task
///
/// Resolves exactly once. A task that panics or is aborted resolves to
/// `TransportError::SendAborted`.
#[derive(Debug)]
pub struct SendHandle {
    task: JoinHandle<Result<SendReceipt, TransportError>>,
}

impl SendHandle {
    pub(crate) fn new(task: JoinHandle<Result<SendReceipt, TransportError>>) -> Self {
        Self { task }
    }
}

impl Future for SendHandle {
    type Output = Result<SendReceipt, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(TransportError::SendAborted(e.to_string())),
        })
    }
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{0}")]
    ConnectFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Peer did not acknowledge the message")]
    AckMissing,

    #[error("Connection timeout")]
    Timeout,

    #[error("Link disabled or not available")]
    LinkDisabled,

    #[error("Message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("Frame is not addressed to the payment service")]
    ServiceMismatch,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown send error: {0}")]
    SendAborted(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Build a connect failure from an io error, falling back to a fixed detail
    pub fn connect_failed(e: &std::io::Error) -> Self {
        Self::ConnectFailed(detail_or_fallback(e))
    }

    /// Build a write failure from an io error, falling back to a fixed detail
    pub fn write_failed(e: &std::io::Error) -> Self {
        Self::WriteFailed(detail_or_fallback(e))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if the operation can be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectFailed(_)
                | Self::WriteFailed(_)
                | Self::ReceiveFailed(_)
                | Self::AcceptFailed(_)
                | Self::AckMissing
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

fn detail_or_fallback(e: &std::io::Error) -> String {
    let text = e.to_string();
    if text.trim().is_empty() {
        FALLBACK_ERROR_DETAIL.to_string()
    } else {
        text
    }
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// One-shot payment exchange over a connection-oriented link
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Deliver one payload to a peer on a background task
    fn send(&self, peer: &PeerAddress, payload: &str) -> SendHandle;

    /// Start the accept loop, delivering inbound events to `sink`.
    /// A no-op while already listening.
    async fn start_listening(&self, sink: mpsc::Sender<InboundEvent>) -> Result<(), TransportError>;

    /// Stop accepting new sessions. A no-op when not listening.
    async fn stop_listening(&self);

    async fn is_listening(&self) -> bool;

    /// Address the listener is currently bound to, if any
    fn local_address(&self) -> Option<PeerAddress>;
}
