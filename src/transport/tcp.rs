// TCP Transport Implementation
// One framed payment message per connection, one connection per message

use crate::transport::frame;
use crate::transport::{
    ConnectionId, InboundEvent, PeerAddress, SendHandle, SendReceipt, Transport, TransportConfig,
    TransportError, SERVICE_NAME,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

// ============================================================================
// LISTENER STATE
// ============================================================================

struct ListenerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

// ============================================================================
// TCP TRANSPORT
// ============================================================================

/// TCP transport for one-shot payment exchanges
pub struct TcpTransport {
    config: TransportConfig,
    link_enabled: Arc<AtomicBool>,
    listener: Mutex<Option<ListenerHandle>>,
    local_address: Arc<StdMutex<Option<SocketAddr>>>,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            link_enabled: Arc::new(AtomicBool::new(true)),
            listener: Mutex::new(None),
            local_address: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether the underlying link is available
    pub fn is_link_enabled(&self) -> bool {
        self.link_enabled.load(Ordering::SeqCst)
    }

    /// Mark the underlying link as available or not
    pub fn set_link_enabled(&self, enabled: bool) {
        self.link_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Transport for TcpTransport {
    fn send(&self, peer: &PeerAddress, payload: &str) -> SendHandle {
        let config = self.config.clone();
        let peer = peer.clone();
        let payload = payload.to_string();
        let link_enabled = self.is_link_enabled();

        SendHandle::new(tokio::spawn(async move {
            if !link_enabled {
                return Err(TransportError::LinkDisabled);
            }
            let result = send_once(&config, &peer, &payload).await;
            if let Err(ref e) = result {
                warn!(%peer, error = %e, "send failed");
            }
            result
        }))
    }

    async fn start_listening(&self, sink: mpsc::Sender<InboundEvent>) -> Result<(), TransportError> {
        let mut guard = self.listener.lock().await;

        if let Some(handle) = guard.as_ref() {
            if !handle.task.is_finished() {
                debug!("listener already running");
                return Ok(());
            }
        }

        if !self.is_link_enabled() {
            return Err(TransportError::LinkDisabled);
        }
        self.config.validate()?;

        let listener = match bind_listener(&self.config, &self.local_address).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!(error = %e, "initial bind failed");
                let _ = sink.send(InboundEvent::AcceptFailed { error: e }).await;
                None
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            self.config.clone(),
            listener,
            sink,
            cancel_rx,
            Arc::clone(&self.local_address),
        ));

        *guard = Some(ListenerHandle {
            cancel: cancel_tx,
            task,
        });
        Ok(())
    }

    async fn stop_listening(&self) {
        let handle = self.listener.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
            if let Err(e) = handle.task.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
    }

    async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    fn local_address(&self) -> Option<PeerAddress> {
        let bound = *self
            .local_address
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bound.map(PeerAddress::from)
    }
}

// ============================================================================
// OUTBOUND
// ============================================================================

async fn send_once(
    config: &TransportConfig,
    peer: &PeerAddress,
    payload: &str,
) -> Result<SendReceipt, TransportError> {
    let started = Instant::now();
    let connection_id = ConnectionId::generate();
    let frame = frame::encode(payload, config.max_message_bytes)?;

    debug!(%connection_id, %peer, service = SERVICE_NAME, "connecting");
    let mut stream = timeout(config.connect_timeout(), TcpStream::connect(peer.socket_string()))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::connect_failed(&e))?;
    stream.set_nodelay(config.nodelay).ok();

    stream
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::write_failed(&e))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::write_failed(&e))?;
    debug!(%connection_id, bytes = frame.len(), "frame flushed, awaiting ack");

    timeout(config.ack_timeout(), frame::read_ack(&mut stream))
        .await
        .map_err(|_| TransportError::AckMissing)??;

    let _ = stream.shutdown().await;
    let elapsed = started.elapsed();
    debug!(%connection_id, ?elapsed, "send completed");

    Ok(SendReceipt {
        connection_id,
        peer: peer.clone(),
        bytes_written: frame.len(),
        elapsed,
    })
}

// ============================================================================
// INBOUND
// ============================================================================

async fn bind_listener(
    config: &TransportConfig,
    local_address: &StdMutex<Option<SocketAddr>>,
) -> Result<TcpListener, TransportError> {
    // Rebind to the address we held before so a random port stays stable
    let previous = *local_address
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let bind_addr = match previous {
        Some(addr) => addr.to_string(),
        None => config.bind_string(),
    };

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;
    let bound = listener
        .local_addr()
        .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

    *local_address
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bound);
    info!(address = %bound, service = SERVICE_NAME, "listening");
    Ok(listener)
}

/// Returns true if cancelled while waiting
async fn wait_or_cancel(cancel: &mut watch::Receiver<bool>, config: &TransportConfig) -> bool {
    tokio::select! {
        _ = cancel.changed() => true,
        _ = tokio::time::sleep(config.accept_backoff()) => false,
    }
}

async fn accept_loop(
    config: TransportConfig,
    mut listener: Option<TcpListener>,
    sink: mpsc::Sender<InboundEvent>,
    mut cancel: watch::Receiver<bool>,
    local_address: Arc<StdMutex<Option<SocketAddr>>>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        if sink.is_closed() {
            warn!("inbound event receiver dropped, stopping listener");
            break;
        }

        let active = match listener.take() {
            Some(active) => active,
            None => match bind_listener(&config, &local_address).await {
                Ok(active) => active,
                Err(e) => {
                    error!(error = %e, "bind failed");
                    let _ = sink.send(InboundEvent::AcceptFailed { error: e }).await;
                    if wait_or_cancel(&mut cancel, &config).await {
                        break;
                    }
                    continue;
                }
            },
        };

        let accepted = tokio::select! {
            _ = cancel.changed() => break,
            accepted = active.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                listener = Some(active);
                debug!(remote = %addr, "accepted connection");
                tokio::spawn(read_session(stream, addr, config.clone(), sink.clone()));
            }
            Err(e) => {
                // Drop the endpoint and rebind after the backoff
                drop(active);
                let error = TransportError::AcceptFailed(e.to_string());
                error!(error = %error, "accept failed");
                let _ = sink.send(InboundEvent::AcceptFailed { error }).await;
                if wait_or_cancel(&mut cancel, &config).await {
                    break;
                }
            }
        }
    }

    *local_address
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    info!(service = SERVICE_NAME, "listener stopped");
}

async fn read_session(
    mut stream: TcpStream,
    addr: SocketAddr,
    config: TransportConfig,
    sink: mpsc::Sender<InboundEvent>,
) {
    let connection_id = ConnectionId::generate();
    let from = PeerAddress::from(addr);

    match timeout(config.read_timeout(), frame::read_frame(&mut stream, config.max_message_bytes)).await {
        Err(_) => {
            warn!(%connection_id, %from, "no complete message before timeout");
        }
        Ok(Ok(None)) => {
            debug!(%connection_id, %from, "peer closed without sending");
        }
        Ok(Err(e)) => {
            warn!(%connection_id, %from, error = %e, "discarding inbound session");
        }
        Ok(Ok(Some(message))) => match frame::write_ack(&mut stream).await {
            Ok(()) => {
                info!(%connection_id, %from, %message, "received message");
                let event = InboundEvent::Received {
                    connection_id,
                    from,
                    message,
                };
                if sink.send(event).await.is_err() {
                    warn!("inbound event receiver dropped");
                }
            }
            Err(e) => {
                warn!(%connection_id, %from, error = %e, "acknowledgement failed, message dropped");
            }
        },
    }

    let _ = stream.shutdown().await;
}
