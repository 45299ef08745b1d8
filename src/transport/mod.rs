// Transport module - THE WIRE
// Connection-oriented peer link carrying one payment message per session

pub mod frame;
mod tcp;
mod traits;

pub use traits::{
    // Core trait
    Transport,
    // Configuration
    TransportConfig,
    // Service identity
    SERVICE_NAME, SERVICE_PORT, SERVICE_UUID, FALLBACK_ERROR_DETAIL,
    // Session types
    ConnectionId, PeerAddress, SendHandle, SendReceipt,
    // Events and errors
    InboundEvent, TransportError,
};

pub use tcp::TcpTransport;
