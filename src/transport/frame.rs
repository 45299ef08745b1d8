// Frame codec - one payment message per connection
//
// Layout: [16-byte service UUID][u32 big-endian length][UTF-8 payload]
// The receiver answers a complete frame with a single ACK byte.

use crate::transport::{TransportError, SERVICE_UUID};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Acknowledgement byte written by the receiver once a frame is complete
pub const ACK: u8 = 0x06;

/// Bytes preceding the payload
pub const HEADER_LEN: usize = 16 + 4;

/// Encode a payload into a single frame
pub fn encode(payload: &str, max_len: usize) -> Result<Vec<u8>, TransportError> {
    let body = payload.as_bytes();
    if body.len() > max_len || body.len() > u32::MAX as usize {
        return Err(TransportError::MessageTooLarge {
            len: body.len(),
            max: max_len,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(SERVICE_UUID.as_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closes before sending a single byte.
/// Fragments are accumulated until the header and the declared payload
/// length have both arrived.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<String>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::ReceiveFailed(format!(
                "connection closed after {} header bytes",
                filled
            )));
        }
        filled += n;
    }

    if header[..16] != SERVICE_UUID.as_bytes()[..] {
        return Err(TransportError::ServiceMismatch);
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[16..]);
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(TransportError::MessageTooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

    Ok(Some(String::from_utf8_lossy(&body).into_owned()))
}

/// Acknowledge a complete frame
pub async fn write_ack<W>(writer: &mut W) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[ACK]).await.map_err(|e| TransportError::write_failed(&e))?;
    writer.flush().await.map_err(|e| TransportError::write_failed(&e))?;
    Ok(())
}

/// Wait for the receiver's acknowledgement
pub async fn read_ack<R>(reader: &mut R) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await {
        Ok(1) if byte[0] == ACK => Ok(()),
        Ok(_) => Err(TransportError::AckMissing),
        Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
    }
}
