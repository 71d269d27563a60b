use crate::server::writer::{
    request::{RequestSender, WriteRequest, channel},
    worker::writer_loop,
};
use core::time::Duration;
use numlog_core::{Error, Record, Result};
use portable_atomic::{AtomicU64, Ordering};
use std::{path::Path, sync::Arc};
use tokio::{
    fs::File,
    io::{AsyncWrite, BufWriter},
    sync::oneshot,
};
use tracing::{debug, info};

/// Opens the record log and spawns its writer task.
pub struct RecordWriter;

impl RecordWriter {
    /// Creates (or truncates) `path` and starts the writer task on the
    /// current runtime.
    ///
    /// # Arguments
    ///
    /// - `path`: Destination log file. Existing contents are discarded.
    /// - `capacity`: Queue capacity, `None` for an unbounded queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub async fn create(path: impl AsRef<Path>, capacity: Option<usize>) -> Result<WriterHandle> {
        let path = path.as_ref();
        let file = File::create(path).await?;
        info!("Record log {} opened (truncated)", path.display());

        Ok(Self::with_output(BufWriter::new(file), capacity))
    }

    /// Starts the writer task on an arbitrary sink instead of a file.
    pub fn with_output<W>(out: W, capacity: Option<usize>) -> WriterHandle
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = channel(capacity);
        let written = Arc::new(AtomicU64::new(0));
        tokio::spawn(writer_loop(rx, out, Arc::clone(&written)));

        WriterHandle { tx, written }
    }
}

/// Cloneable producer handle to the writer task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: RequestSender,
    written: Arc<AtomicU64>,
}

impl WriterHandle {
    /// Queues one record for persistence. Waits only when the queue is
    /// bounded and full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the writer has stopped
    /// accepting requests.
    pub async fn enqueue(&self, record: Record) -> Result<()> {
        self.tx
            .send(WriteRequest::Append(record))
            .await
            .map_err(|_| Error::ServiceShutdown)
    }

    /// Number of records successfully written so far.
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Drains everything queued before this call, flushes the file and stops
    /// the writer. Returns the lifetime number of records written.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the writer had already stopped.
    /// - [`Error::ChannelError`] if the writer went away before answering.
    /// - [`Error::Timeout`] if the drain did not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<u64> {
        let drain = async {
            let (response, ack) = oneshot::channel();
            self.tx
                .send(WriteRequest::Shutdown { response })
                .await
                .map_err(|_| Error::ServiceShutdown)?;
            ack.await.map_err(|_| Error::ChannelError {
                context: "writer dropped the shutdown acknowledgement".to_string(),
            })
        };

        let total = tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| Error::Timeout {
                context: format!("writer drain exceeded {timeout:?}"),
            })??;

        debug!("Writer drained; {total} records persisted");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(s: &str) -> Record {
        Record::parse(s).unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        std::fs::write(&path, "stale contents\n").unwrap();

        let writer = RecordWriter::create(&path, None).await.unwrap();
        assert_eq!(writer.shutdown(TIMEOUT).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn enqueued_records_are_on_disk_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        let writer = RecordWriter::create(&path, None).await.unwrap();

        let producer = writer.clone();
        for r in ["000000001", "421179925"] {
            producer.enqueue(record(r)).await.unwrap();
        }

        assert_eq!(writer.shutdown(TIMEOUT).await.unwrap(), 2);
        assert_eq!(writer.records_written(), 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "000000001\n421179925\n"
        );
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordWriter::create(dir.path().join("numbers.log"), None)
            .await
            .unwrap();
        writer.shutdown(TIMEOUT).await.unwrap();

        assert!(matches!(
            writer.enqueue(record("123456789")).await,
            Err(Error::ServiceShutdown)
        ));
        assert!(matches!(
            writer.shutdown(TIMEOUT).await,
            Err(Error::ServiceShutdown)
        ));
    }

    #[tokio::test]
    async fn bounded_queue_drains_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.log");
        let writer = RecordWriter::create(&path, Some(2)).await.unwrap();

        for i in 0..100u32 {
            writer.enqueue(record(&format!("{i:09}"))).await.unwrap();
        }
        assert_eq!(writer.shutdown(TIMEOUT).await.unwrap(), 100);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "000000000");
        assert_eq!(lines[99], "000000099");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_gives_up_on_a_stalled_output() {
        // Nobody reads the other end, so the first record never finishes.
        let (_reader, out) = tokio::io::duplex(1);
        let writer = RecordWriter::with_output(out, None);
        for r in ["111111111", "222222222"] {
            writer.enqueue(record(r)).await.unwrap();
        }

        let started = tokio::time::Instant::now();
        assert!(matches!(
            writer.shutdown(Duration::from_millis(100)).await,
            Err(Error::Timeout { .. })
        ));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(writer.records_written(), 0);
    }

    #[tokio::test]
    async fn create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("numbers.log");
        assert!(matches!(
            RecordWriter::create(path, None).await,
            Err(Error::Io(_))
        ));
    }
}
