use crate::server::{
    telemetry::increment_write_errors,
    writer::request::{RequestReceiver, WriteRequest},
};
use numlog_core::Record;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

/// Maximum number of requests pulled from the queue per batch.
pub const WRITE_BATCH: usize = 256;

/// Writer task: the sole consumer of the writer queue and sole owner of the
/// output.
///
/// Requests are received in batches; each record is written followed by
/// `\n`, and the output is flushed once per batch. Write and flush failures
/// are logged and the loop moves on: delivery is best effort and a failure
/// never stops the task.
///
/// On [`WriteRequest::Shutdown`] the queue is closed to new requests, every
/// request already queued is still written, the output is flushed, and the
/// lifetime count of written records is sent back.
///
/// # Arguments
///
/// - `rx`: Consumer half of the writer queue.
/// - `out`: Destination of the records, usually a buffered log file.
/// - `written`: Shared counter of successfully written records.
pub async fn writer_loop<W>(mut rx: RequestReceiver, mut out: W, written: Arc<AtomicU64>)
where
    W: AsyncWrite + Unpin,
{
    trace!("Writer started");

    let mut batch = Vec::with_capacity(WRITE_BATCH);
    let mut ack = None;

    loop {
        if rx.recv_many(&mut batch, WRITE_BATCH).await == 0 {
            // Queue closed and empty: either every handle was dropped or a
            // shutdown request closed it and the backlog is drained.
            break;
        }

        for request in batch.drain(..) {
            match request {
                WriteRequest::Append(record) => {
                    if write_record(&mut out, &record).await {
                        written.fetch_add(1, Ordering::Relaxed);
                    }
                }
                WriteRequest::Shutdown { response } => {
                    if ack.is_none() {
                        debug!("Writer received shutdown signal; draining queue");
                        rx.close();
                        ack = Some(response);
                    } else {
                        // A second shutdown request is answered once the
                        // drain finishes, with the same count.
                        let _ = response.send(written.load(Ordering::Relaxed));
                    }
                }
            }
        }

        flush(&mut out).await;
    }

    flush(&mut out).await;
    if let Err(e) = out.shutdown().await {
        warn!("Error closing record log: {e}");
    }

    let total = written.load(Ordering::Relaxed);
    if let Some(response) = ack {
        if response.send(total).is_err() {
            warn!("Writer failed to acknowledge shutdown");
        }
    }

    debug!("Writer stopped after writing {total} records");
}

async fn write_record<W>(out: &mut W, record: &Record) -> bool
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        out.write_all(record.as_bytes()).await?;
        out.write_all(b"\n").await
    }
    .await;

    match result {
        Ok(()) => true,
        Err(e) => {
            increment_write_errors();
            error!("Failed to write record {record}: {e}");
            false
        }
    }
}

async fn flush<W>(out: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = out.flush().await {
        increment_write_errors();
        error!("Failed to flush record log: {e}");
    }
}
