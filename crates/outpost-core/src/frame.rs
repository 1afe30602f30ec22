//! Length-prefixed JSON framing for process workers.
//!
//! Format: 4-byte length (u32 LE) + UTF-8 JSON body.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest frame accepted unless configured otherwise (100MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Write a message to a writer using length-prefixed JSON encoding.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Ipc(format!("IPC message too large: {} bytes", bytes.len())))?;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read one raw frame body.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader
            .read(&mut len_bytes[filled..])
            .await
            .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Ipc(format!(
                "IPC stream ended inside a length prefix ({} of 4 bytes)",
                filled
            )));
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > max_len {
        return Err(Error::Ipc(format!(
            "IPC message too large: {} bytes (limit {})",
            len, max_len
        )));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    Ok(Some(bytes))
}

/// Decode a frame body into a channel value.
pub fn decode_frame(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))
}

/// Read frames until end of stream, forwarding each decoded value.
///
/// Bodies that are not valid JSON are logged and skipped; the length prefix
/// keeps the stream aligned. Stops early if the receiving side is gone.
pub async fn pump_inbound<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::UnboundedSender<Value>,
    max_len: usize,
) -> Result<()> {
    loop {
        let Some(bytes) = read_frame(&mut reader, max_len).await? else {
            tracing::debug!("IPC stream reached end of input");
            return Ok(());
        };

        match decode_frame(&bytes) {
            Ok(value) => {
                if tx.send(value).is_err() {
                    return Ok(());
                }
            }
            Err(e) => tracing::warn!("Skipping malformed IPC frame: {}", e),
        }
    }
}

/// Write every value from the channel as a frame until the channel closes.
pub async fn pump_outbound<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Value>,
) -> Result<()> {
    while let Some(value) = rx.recv().await {
        write_frame(&mut writer, &value).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let message = json!({"action": "invoke", "id": 0, "name": "square", "args": [5]});

        let mut buf = Vec::new();
        write_frame(&mut buf, &message).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let bytes = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), message);

        // Nothing left: clean end of stream.
        assert!(read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!("a fairly long string body"))
            .await
            .unwrap();

        let mut cursor = Cursor::new(buf);
        let result = read_frame(&mut cursor, 4).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"{\"a\"");

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.is_err());
    }

    #[tokio::test]
    async fn test_partial_length_prefix_is_an_error() {
        let mut cursor = Cursor::new(vec![7u8, 0]);
        let result = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(Error::Ipc(msg)) if msg.contains("2 of 4")));

        let (tx, _rx) = mpsc::unbounded_channel();
        let pumped = pump_inbound(Cursor::new(vec![1u8, 0, 0]), tx, DEFAULT_MAX_FRAME_LEN).await;
        assert!(pumped.is_err());
    }

    #[tokio::test]
    async fn test_malformed_body_skipped_without_desync() {
        let garbage = b"not json";
        let mut buf = Vec::new();
        buf.extend_from_slice(&(garbage.len() as u32).to_le_bytes());
        buf.extend_from_slice(garbage);
        write_frame(&mut buf, &json!({"action": "invoke-factory"}))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        pump_inbound(Cursor::new(buf), tx, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(json!({"action": "invoke-factory"})));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_outbound_writes_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(json!(1)).unwrap();
        tx.send(json!(2)).unwrap();
        drop(tx);

        let mut buf = Vec::new();
        pump_outbound(&mut buf, rx).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let first = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
        let second = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(decode_frame(&first).unwrap(), json!(1));
        assert_eq!(decode_frame(&second).unwrap(), json!(2));
    }
}
