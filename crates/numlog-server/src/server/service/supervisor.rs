use crate::server::{
    config::ServerConfig,
    connection::{registry::ConnectionRegistry, worker::connection_loop},
    context::ServerContext,
    reporter::{PeriodicReporter, ReportSchedule},
    telemetry::{increment_connections_accepted, increment_connections_rejected},
    writer::handle::{RecordWriter, WriterHandle},
};
use core::time::Duration;
use numlog_core::{Ledger, Result, WindowStats};
use socket2::SockRef;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` so a persistent error (e.g. file descriptor
/// exhaustion) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of a completed [`IngestServer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Distinct records seen over the run.
    pub unique_total: u64,
    /// Records the writer persisted.
    pub records_written: u64,
    /// Connections that were open when shutdown began.
    pub connections_closed: usize,
}

/// The ingestion service: listener, connection workers, ledger, writer and
/// reporter.
///
/// [`bind`](Self::bind) acquires every resource up front so startup failures
/// surface before any client is served. [`run`](Self::run) consumes the server
/// and returns once the shutdown sequence completes.
pub struct IngestServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    ledger: Arc<dyn Ledger>,
    writer: WriterHandle,
    reporter: PeriodicReporter,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
}

impl IngestServer {
    /// Validates `config`, builds the ledger, truncates the record log,
    /// starts the writer and binds the listener.
    ///
    /// # Errors
    ///
    /// - [`numlog_core::Error::Config`] if `config` is invalid or the ledger
    ///   cannot be built.
    /// - [`numlog_core::Error::Io`] if the log file cannot be created or the
    ///   address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let writer = RecordWriter::create(&config.log_file, config.writer_queue_capacity).await?;
        Self::bind_with_writer(config, writer).await
    }

    /// Like [`bind`](Self::bind), but persists through an already running
    /// `writer` instead of opening `config.log_file`.
    ///
    /// # Errors
    ///
    /// Same as [`bind`](Self::bind), minus log file creation.
    pub async fn bind_with_writer(config: ServerConfig, writer: WriterHandle) -> Result<Self> {
        config.validate()?;
        let ledger = config.build_ledger()?;

        let listener = TcpListener::bind(&config.server_addr).await?;
        let local_addr = listener.local_addr()?;

        let reporter = PeriodicReporter::new(
            Arc::clone(&ledger),
            ReportSchedule {
                initial_delay: config.report_delay,
                interval: config.report_interval,
            },
        );

        Ok(Self {
            registry: ConnectionRegistry::new(config.max_connections),
            config,
            listener,
            local_addr,
            ledger,
            writer,
            reporter,
            shutdown: CancellationToken::new(),
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server's shutdown flag. Cancelling it (from a signal handler, a
    /// test, or a `terminate` line) starts the shutdown sequence.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    /// Live view of the connection set.
    pub fn connections(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    /// Receives every periodic report. The channel closes when the server
    /// stops.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<WindowStats> {
        self.reporter.subscribe()
    }

    /// Serves clients until the shutdown flag is raised, then shuts down:
    ///
    /// 1. Stop accepting and close the listening socket.
    /// 2. Close every registered connection and wait, bounded by the shutdown
    ///    timeout, for the workers to exit. Stragglers are aborted.
    /// 3. Stop the reporter.
    /// 4. Drain and stop the writer, bounded by the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Errors in individual connections or in the writer drain are logged, not
    /// returned; the sequence always runs to completion.
    pub async fn run(self) -> Result<ShutdownSummary> {
        let Self {
            config,
            listener,
            local_addr,
            ledger,
            writer,
            reporter,
            registry,
            shutdown,
        } = self;

        let ctx = ServerContext {
            ledger: Arc::clone(&ledger),
            writer: writer.clone(),
            shutdown: shutdown.clone(),
            read_timeout: config.read_timeout,
            max_line_length: config.max_line_length,
        };

        reporter.start();
        info!(
            "Accepting up to {} connections on {local_addr}",
            registry.capacity()
        );

        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("Shutdown flag raised; leaving accept loop");
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection worker panicked: {e}");
                        }
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => admit(stream, peer, &registry, &ctx, &mut workers),
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        // === Phase 1: Stop accepting ===
        drop(listener);
        info!("Listener on {local_addr} closed");

        // === Phase 2: Close live connections ===
        let connections_closed = registry.close_all();
        info!("Closing {connections_closed} open connections");
        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connection workers still running after {:?}; aborting",
                workers.len(),
                config.shutdown_timeout
            );
            workers.shutdown().await;
        }

        // === Phase 3: Stop reporting ===
        reporter.stop().await;

        // === Phase 4: Drain the writer ===
        drop(ctx);
        let records_written = match writer.shutdown(config.shutdown_timeout).await {
            Ok(total) => total,
            Err(e) => {
                error!("Record log did not drain cleanly: {e}");
                writer.records_written()
            }
        };

        let summary = ShutdownSummary {
            unique_total: ledger.unique_total(),
            records_written,
            connections_closed,
        };
        info!(
            "Shutdown complete: {} unique records, {} written",
            summary.unique_total, summary.records_written
        );
        Ok(summary)
    }
}

/// Registers and spawns a worker for `stream`, or closes it immediately when
/// the cap is reached.
fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &ConnectionRegistry,
    ctx: &ServerContext,
    workers: &mut JoinSet<()>,
) {
    let guard = match registry.try_register(peer) {
        Ok(guard) => guard,
        Err(rejection) => {
            increment_connections_rejected();
            warn!("Rejecting connection from {peer}: {rejection}");
            // Dropping the stream closes the socket.
            drop(stream);
            return;
        }
    };

    if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
        debug!("Failed to enable keep-alive for {peer}: {e}");
    }

    increment_connections_accepted();
    let ctx = ctx.clone();
    workers.spawn(async move {
        connection_loop(stream, guard, ctx).await;
    });
}
