use crate::server::writer::handle::WriterHandle;
use core::time::Duration;
use numlog_core::Ledger;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every connection worker.
///
/// Nothing here is global: the supervisor builds one context per server and
/// clones it into each worker, so independent servers (and tests) never share
/// counters or shutdown state.
#[derive(Clone)]
pub struct ServerContext {
    /// Dedup ledger for the whole run.
    pub ledger: Arc<dyn Ledger>,
    /// Producer handle to the record log.
    pub writer: WriterHandle,
    /// The server's shutdown flag. Cancelled by a `terminate` line or a
    /// process signal.
    pub shutdown: CancellationToken,
    /// Silence between reads after which a connection is dropped.
    pub read_timeout: Duration,
    /// Longest accepted line, excluding the `\n`.
    pub max_line_length: usize,
}
