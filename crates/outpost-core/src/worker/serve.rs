//! Running a dispatcher over a byte stream, as a process worker does.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::frame;

use super::dispatcher::Dispatcher;
use super::registry::Registry;

/// Serve the named entry over stdin/stdout until the host closes stdin.
///
/// Stdout carries the channel: anything else printed there corrupts it, so
/// diagnostics must go to stderr.
pub async fn serve_stdio(registry: &Registry, entry: &str, max_frame_len: usize) -> Result<()> {
    serve(
        registry,
        entry,
        tokio::io::stdin(),
        tokio::io::stdout(),
        max_frame_len,
    )
    .await
}

/// Serve the named entry over an arbitrary reader/writer pair.
pub async fn serve<R, W>(
    registry: &Registry,
    entry: &str,
    reader: R,
    writer: W,
    max_frame_len: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let factory = registry
        .get(entry)
        .ok_or_else(|| Error::UnknownEntry(entry.to_string()))?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reader_task = tokio::spawn(frame::pump_inbound(reader, inbound_tx, max_frame_len));
    let writer_task = tokio::spawn(frame::pump_outbound(writer, outbound_rx));

    tracing::debug!("Serving worker entry '{}'", entry);
    Dispatcher::new(factory, outbound_tx)
        .run(inbound_rx, std::future::pending())
        .await;

    // The dispatcher only returns once the inbound side is exhausted.
    let read_result = reader_task
        .await
        .map_err(|e| Error::Ipc(format!("Worker reader task failed: {}", e)))?;
    let write_result = writer_task
        .await
        .map_err(|e| Error::Ipc(format!("Worker writer task failed: {}", e)))?;

    read_result?;
    write_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, duplex};

    use crate::frame::{DEFAULT_MAX_FRAME_LEN, decode_frame, read_frame, write_frame};
    use crate::worker::operation::{OperationTable, arg};

    fn registry() -> Registry {
        Registry::new().register("math", |_| {
            OperationTable::new().with_sync("square", |args| {
                let x: i64 = arg(&args, 0)?;
                Ok(json!(x * x))
            })
        })
    }

    #[tokio::test]
    async fn test_serve_over_duplex_stream() {
        let (mut host_side, worker_side) = duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_side);

        let server = tokio::spawn(async move {
            serve(&registry(), "math", worker_read, worker_write, DEFAULT_MAX_FRAME_LEN).await
        });

        write_frame(&mut host_side, &json!({"action": "invoke-factory"}))
            .await
            .unwrap();
        write_frame(
            &mut host_side,
            &json!({"action": "invoke", "id": 0, "name": "square", "args": [6]}),
        )
        .await
        .unwrap();

        let names = read_frame(&mut host_side, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(
            decode_frame(&names).unwrap(),
            json!({"action": "list-functions", "names": ["square"]})
        );
        let reply = read_frame(&mut host_side, DEFAULT_MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(
            decode_frame(&reply).unwrap(),
            json!({"action": "respond", "id": 0, "value": 36})
        );

        host_side.shutdown().await.unwrap();
        drop(host_side);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_entry_rejected_before_reading() {
        let (_host_side, worker_side) = duplex(64);
        let (r, w) = tokio::io::split(worker_side);
        let result = serve(&registry(), "nope", r, w, DEFAULT_MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(Error::UnknownEntry(name)) if name == "nope"));
    }
}
