use numlog_core::Record;
use tokio::sync::{mpsc, oneshot};

/// Messages processed by the writer task, in FIFO order.
#[derive(Debug)]
pub enum WriteRequest {
    /// Append one record followed by `\n`.
    Append(Record),
    /// Drain everything queued so far, stop, and reply with the number of
    /// records written over the writer's lifetime.
    Shutdown { response: oneshot::Sender<u64> },
}

/// Producer half of the writer queue.
#[derive(Debug, Clone)]
pub enum RequestSender {
    Unbounded(mpsc::UnboundedSender<WriteRequest>),
    Bounded(mpsc::Sender<WriteRequest>),
}

/// Consumer half of the writer queue.
#[derive(Debug)]
pub enum RequestReceiver {
    Unbounded(mpsc::UnboundedReceiver<WriteRequest>),
    Bounded(mpsc::Receiver<WriteRequest>),
}

/// Creates the writer queue. `None` means unbounded.
pub fn channel(capacity: Option<usize>) -> (RequestSender, RequestReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (RequestSender::Bounded(tx), RequestReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (RequestSender::Unbounded(tx), RequestReceiver::Unbounded(rx))
        }
    }
}

impl RequestSender {
    /// Sends a request, waiting for capacity on a bounded queue.
    ///
    /// Returns the request back if the writer has stopped.
    pub async fn send(&self, request: WriteRequest) -> Result<(), WriteRequest> {
        match self {
            Self::Unbounded(tx) => tx.send(request).map_err(|e| e.0),
            Self::Bounded(tx) => tx.send(request).await.map_err(|e| e.0),
        }
    }
}

impl RequestReceiver {
    /// Receives up to `limit` requests into `buffer`, waiting for at least
    /// one. Returns `0` once the queue is closed and empty.
    pub async fn recv_many(&mut self, buffer: &mut Vec<WriteRequest>, limit: usize) -> usize {
        match self {
            Self::Unbounded(rx) => rx.recv_many(buffer, limit).await,
            Self::Bounded(rx) => rx.recv_many(buffer, limit).await,
        }
    }

    /// Stops accepting new requests; already queued ones can still be
    /// received.
    pub fn close(&mut self) {
        match self {
            Self::Unbounded(rx) => rx.close(),
            Self::Bounded(rx) => rx.close(),
        }
    }
}
