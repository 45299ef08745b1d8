// TCP Transport Tests
// Send, listen, stop, and the accept-loop fault policy over loopback

use offpay::transport::{
    frame, InboundEvent, PeerAddress, TcpTransport, Transport, TransportConfig, TransportError,
    SERVICE_UUID,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn loopback_config() -> TransportConfig {
    TransportConfig::new()
        .with_bind_address("127.0.0.1")
        .with_bind_port(0)
        .with_connect_timeout_ms(2_000)
        .with_read_timeout_ms(1_000)
        .with_ack_timeout_ms(1_000)
        .with_accept_backoff_ms(100)
}

async fn start_receiver(config: TransportConfig) -> (TcpTransport, mpsc::Receiver<InboundEvent>, PeerAddress) {
    let transport = TcpTransport::new(config);
    let (tx, rx) = mpsc::channel(64);
    transport.start_listening(tx).await.unwrap();
    let address = transport.local_address().expect("listener should be bound");
    (transport, rx, address)
}

async fn next_event(rx: &mut mpsc::Receiver<InboundEvent>) -> InboundEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// A loopback port with nothing listening on it
async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_start_listening_binds() {
    let (transport, _rx, address) = start_receiver(loopback_config()).await;

    assert!(transport.is_listening().await);
    assert_eq!(address.host(), "127.0.0.1");
    assert!(address.port() > 0);

    transport.stop_listening().await;
}

#[tokio::test]
async fn test_start_listening_twice_is_noop() {
    let (transport, _rx, address) = start_receiver(loopback_config()).await;

    let (tx2, _rx2) = mpsc::channel(8);
    transport.start_listening(tx2).await.unwrap();

    assert!(transport.is_listening().await);
    assert_eq!(transport.local_address(), Some(address));

    transport.stop_listening().await;
}

#[tokio::test]
async fn test_stop_listening_when_not_listening() {
    let transport = TcpTransport::new(loopback_config());

    transport.stop_listening().await;

    assert!(!transport.is_listening().await);
    assert!(transport.local_address().is_none());
}

#[tokio::test]
async fn test_stop_listening_releases_endpoint() {
    let (transport, _rx, address) = start_receiver(loopback_config()).await;

    transport.stop_listening().await;

    assert!(!transport.is_listening().await);
    assert!(transport.local_address().is_none());
    assert!(TcpStream::connect(address.socket_string()).await.is_err());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (transport, _rx, _) = start_receiver(loopback_config()).await;
    transport.stop_listening().await;

    let (tx, mut rx) = mpsc::channel(8);
    transport.start_listening(tx).await.unwrap();
    let address = transport.local_address().unwrap();

    let sender = TcpTransport::new(loopback_config());
    sender.send(&address, "again").await.unwrap();

    match next_event(&mut rx).await {
        InboundEvent::Received { message, .. } => assert_eq!(message, "again"),
        other => panic!("unexpected event: {:?}", other),
    }

    transport.stop_listening().await;
}

#[tokio::test]
async fn test_link_disabled() {
    let transport = TcpTransport::new(loopback_config());
    transport.set_link_enabled(false);

    let (tx, _rx) = mpsc::channel(8);
    let result = transport.start_listening(tx).await;
    assert!(matches!(result, Err(TransportError::LinkDisabled)));
    assert!(!transport.is_listening().await);

    let peer = PeerAddress::tcp("127.0.0.1", unused_port().await);
    let sent = transport.send(&peer, "hello").await;
    assert!(matches!(sent, Err(TransportError::LinkDisabled)));
}

// ============================================================================
// SEND / RECEIVE
// ============================================================================

#[tokio::test]
async fn test_send_and_receive() {
    let (receiver, mut rx, address) = start_receiver(loopback_config()).await;
    let sender = TcpTransport::new(loopback_config());

    let receipt = sender.send(&address, "X wants to send 500").await.unwrap();
    assert_eq!(receipt.peer, address);
    assert_eq!(receipt.bytes_written, frame::HEADER_LEN + "X wants to send 500".len());

    match next_event(&mut rx).await {
        InboundEvent::Received { message, from, .. } => {
            assert_eq!(message, "X wants to send 500");
            assert_eq!(from.host(), "127.0.0.1");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_send_utf8_payload() {
    let (receiver, mut rx, address) = start_receiver(loopback_config()).await;
    let sender = TcpTransport::new(loopback_config());

    sender.send(&address, "Pixel wants to send ₹250").await.unwrap();

    match next_event(&mut rx).await {
        InboundEvent::Received { message, .. } => assert_eq!(message, "Pixel wants to send ₹250"),
        other => panic!("unexpected event: {:?}", other),
    }

    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_concurrent_sends_all_delivered() {
    let (receiver, mut rx, address) = start_receiver(loopback_config()).await;
    let sender = TcpTransport::new(loopback_config());

    let handles: Vec<_> = (0..10)
        .map(|i| sender.send(&address, &format!("peer-{} wants to send {}", i, i + 1)))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut messages = Vec::new();
    for _ in 0..10 {
        if let InboundEvent::Received { message, .. } = next_event(&mut rx).await {
            messages.push(message);
        }
    }
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), 10);

    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_send_to_unreachable_peer_fails() {
    let sender = TcpTransport::new(loopback_config());
    let peer = PeerAddress::tcp("127.0.0.1", unused_port().await);

    let result = timeout(Duration::from_secs(5), sender.send(&peer, "hello"))
        .await
        .expect("send should finish within the bound");

    let err = result.unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailed(_) | TransportError::Timeout));
    assert!(!err.to_string().is_empty());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_send_oversized_payload_fails_before_connecting() {
    let sender = TcpTransport::new(loopback_config().with_max_message_bytes(8));
    let peer = PeerAddress::tcp("127.0.0.1", unused_port().await);

    let result = sender.send(&peer, "this is far too long").await;

    assert!(matches!(result, Err(TransportError::MessageTooLarge { max: 8, .. })));
}

#[tokio::test]
async fn test_send_without_ack_fails() {
    // A peer that reads the frame but never acknowledges it
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();
    let hold = tokio::spawn(async move {
        let (mut stream, _) = silent.accept().await.unwrap();
        let mut buf = vec![0u8; 256];
        let _ = stream.read(&mut buf).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let sender = TcpTransport::new(loopback_config().with_ack_timeout_ms(200));
    let result = sender.send(&PeerAddress::tcp("127.0.0.1", port), "hello").await;

    assert!(matches!(result, Err(TransportError::AckMissing)));
    hold.abort();
}

// ============================================================================
// INBOUND SESSIONS
// ============================================================================

#[tokio::test]
async fn test_no_connections_no_events() {
    let (receiver, mut rx, _) = start_receiver(loopback_config().with_read_timeout_ms(200)).await;

    let waited = timeout(Duration::from_millis(500), rx.recv()).await;

    assert!(waited.is_err());
    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_silent_session_times_out_and_closes() {
    let (receiver, mut rx, address) = start_receiver(loopback_config().with_read_timeout_ms(200)).await;

    let mut stream = TcpStream::connect(address.socket_string()).await.unwrap();
    let mut buf = [0u8; 1];
    let closed = timeout(Duration::from_secs(2), stream.read(&mut buf)).await.unwrap();

    assert_eq!(closed.unwrap(), 0);
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_fragmented_frame_is_accumulated() {
    let (receiver, mut rx, address) = start_receiver(loopback_config()).await;
    let bytes = frame::encode("slow wants to send 75", 1024).unwrap();

    let mut stream = TcpStream::connect(address.socket_string()).await.unwrap();
    stream.set_nodelay(true).unwrap();
    for chunk in [&bytes[..3], &bytes[3..18], &bytes[18..25], &bytes[25..]] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], frame::ACK);

    match next_event(&mut rx).await {
        InboundEvent::Received { message, .. } => assert_eq!(message, "slow wants to send 75"),
        other => panic!("unexpected event: {:?}", other),
    }

    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_foreign_service_is_rejected() {
    let (receiver, mut rx, address) = start_receiver(loopback_config()).await;

    let mut bytes = frame::encode("hello", 1024).unwrap();
    bytes[0] ^= 0xFF;
    assert_ne!(&bytes[..16], SERVICE_UUID.as_bytes());

    let mut stream = TcpStream::connect(address.socket_string()).await.unwrap();
    stream.write_all(&bytes).await.unwrap();

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    receiver.stop_listening().await;
}

#[tokio::test]
async fn test_oversized_inbound_frame_is_rejected() {
    let (receiver, mut rx, address) = start_receiver(loopback_config().with_max_message_bytes(16)).await;

    let mut header = Vec::new();
    header.extend_from_slice(SERVICE_UUID.as_bytes());
    header.extend_from_slice(&1_000_000u32.to_be_bytes());

    let mut stream = TcpStream::connect(address.socket_string()).await.unwrap();
    stream.write_all(&header).await.unwrap();

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    receiver.stop_listening().await;
}

// ============================================================================
// ACCEPT LOOP FAULT POLICY
// ============================================================================

#[tokio::test]
async fn test_bind_failure_reported_and_retried() {
    let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let transport = TcpTransport::new(loopback_config().with_bind_port(port));
    let (tx, mut rx) = mpsc::channel(64);
    transport.start_listening(tx).await.unwrap();

    match next_event(&mut rx).await {
        InboundEvent::AcceptFailed { error } => assert!(matches!(error, TransportError::AcceptFailed(_))),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(transport.is_listening().await);

    // Once the port frees up the loop binds it on a later retry
    drop(blocker);
    let bound = timeout(Duration::from_secs(5), async {
        loop {
            if transport.local_address().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(bound.is_ok());

    let sender = TcpTransport::new(loopback_config());
    sender
        .send(&PeerAddress::tcp("127.0.0.1", port), "recovered")
        .await
        .unwrap();

    loop {
        match next_event(&mut rx).await {
            InboundEvent::Received { message, .. } => {
                assert_eq!(message, "recovered");
                break;
            }
            InboundEvent::AcceptFailed { .. } => continue,
        }
    }

    transport.stop_listening().await;
    assert!(!transport.is_listening().await);
}

#[tokio::test]
async fn test_stop_interrupts_backoff() {
    let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let transport = TcpTransport::new(
        loopback_config()
            .with_bind_port(port)
            .with_accept_backoff_ms(60_000),
    );
    let (tx, _rx) = mpsc::channel(64);
    transport.start_listening(tx).await.unwrap();

    let stopped = timeout(Duration::from_secs(2), transport.stop_listening()).await;

    assert!(stopped.is_ok());
    assert!(!transport.is_listening().await);
}
