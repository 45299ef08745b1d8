// Frame Codec Tests
// Length-prefixed framing, service header checks, and acknowledgements

use offpay::transport::{frame, TransportError, SERVICE_UUID};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt};

#[tokio::test]
async fn test_read_frame_complete() {
    let bytes = frame::encode("X wants to send 500", 1024).unwrap();
    let mut reader = bytes.as_slice();

    let message = frame::read_frame(&mut reader, 1024).await.unwrap();

    assert_eq!(message.as_deref(), Some("X wants to send 500"));
}

#[tokio::test]
async fn test_read_frame_empty_payload() {
    let bytes = frame::encode("", 1024).unwrap();
    let mut reader = bytes.as_slice();

    let message = frame::read_frame(&mut reader, 1024).await.unwrap();

    assert_eq!(message.as_deref(), Some(""));
}

#[tokio::test]
async fn test_read_frame_accumulates_fragments() {
    let bytes = frame::encode("fragmented", 1024).unwrap();
    let (mut client, mut server) = duplex(64);

    let writer = tokio::spawn(async move {
        for chunk in bytes.chunks(3) {
            client.write_all(chunk).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client
    });

    let message = frame::read_frame(&mut server, 1024).await.unwrap();
    assert_eq!(message.as_deref(), Some("fragmented"));
    writer.await.unwrap();
}

#[tokio::test]
async fn test_read_frame_truncated_header() {
    let bytes = frame::encode("cut", 1024).unwrap();
    let mut reader = &bytes[..10];

    let result = frame::read_frame(&mut reader, 1024).await;

    assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));
}

#[tokio::test]
async fn test_read_frame_truncated_body() {
    let bytes = frame::encode("truncated body", 1024).unwrap();
    let mut reader = &bytes[..bytes.len() - 3];

    let result = frame::read_frame(&mut reader, 1024).await;

    assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));
}

#[tokio::test]
async fn test_read_frame_wrong_service() {
    let mut bytes = frame::encode("hello", 1024).unwrap();
    bytes[15] = bytes[15].wrapping_add(1);
    let mut reader = bytes.as_slice();

    let result = frame::read_frame(&mut reader, 1024).await;

    assert!(matches!(result, Err(TransportError::ServiceMismatch)));
}

#[tokio::test]
async fn test_read_frame_declared_length_over_limit() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(SERVICE_UUID.as_bytes());
    bytes.extend_from_slice(&2048u32.to_be_bytes());
    let mut reader = bytes.as_slice();

    let result = frame::read_frame(&mut reader, 1024).await;

    assert!(matches!(result, Err(TransportError::MessageTooLarge { len: 2048, max: 1024 })));
}

#[tokio::test]
async fn test_read_frame_invalid_utf8_is_lossy() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(SERVICE_UUID.as_bytes());
    bytes.extend_from_slice(&3u32.to_be_bytes());
    bytes.extend_from_slice(&[b'o', 0xFF, b'k']);
    let mut reader = bytes.as_slice();

    let message = frame::read_frame(&mut reader, 1024).await.unwrap().unwrap();

    assert!(message.starts_with('o'));
    assert!(message.ends_with('k'));
}

#[tokio::test]
async fn test_ack_round_trip() {
    let (mut client, mut server) = duplex(8);

    frame::write_ack(&mut server).await.unwrap();

    assert!(frame::read_ack(&mut client).await.is_ok());
}

#[tokio::test]
async fn test_ack_missing_on_close() {
    let mut closed: &[u8] = &[];

    assert!(matches!(frame::read_ack(&mut closed).await, Err(TransportError::AckMissing)));
}

#[tokio::test]
async fn test_ack_wrong_byte() {
    let mut wrong: &[u8] = &[0x15];

    assert!(matches!(frame::read_ack(&mut wrong).await, Err(TransportError::AckMissing)));
}
