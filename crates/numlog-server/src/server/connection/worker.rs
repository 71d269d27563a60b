use crate::server::{
    connection::{
        codec::MessageCodec,
        processor::{LineOutcome, process_line},
        registry::ConnectionGuard,
        timeout::IdleTimeout,
    },
    context::ServerContext,
    telemetry::{decrement_connections_active, increment_connections_active},
};
use core::fmt;
use futures::StreamExt;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Why a connection worker stopped reading.
#[derive(Debug)]
pub enum CloseReason {
    /// The client closed its side.
    Eof,
    /// Nothing was received for the read timeout.
    Idle,
    /// The supervisor closed the connection during shutdown.
    Closed,
    /// This client sent the shutdown token.
    Terminate,
    /// Reading from the socket failed.
    Error(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("client closed the connection"),
            Self::Idle => f.write_str("read timed out"),
            Self::Closed => f.write_str("server shutting down"),
            Self::Terminate => f.write_str("terminate requested"),
            Self::Error(e) => write!(f, "read error: {e}"),
        }
    }
}

/// Reads and processes lines from one client until it goes away, idles out,
/// sends the shutdown token, or the server closes it.
///
/// The read timeout bounds the silence between reads, not the time to
/// assemble a line. Errors end this connection only. The registry slot held
/// by `guard` is released when this returns, and the socket is closed when
/// the framed reader drops.
///
/// # Arguments
///
/// - `stream`: The client socket (or any byte stream in tests).
/// - `guard`: The connection's registry slot and close token.
/// - `ctx`: Shared server state.
pub async fn connection_loop<S>(stream: S, guard: ConnectionGuard, ctx: ServerContext) -> CloseReason
where
    S: AsyncRead + Unpin,
{
    let peer = guard.peer();
    increment_connections_active();
    debug!("Connection {} from {peer} opened", guard.id());

    let mut frames = core::pin::pin!(FramedRead::new(
        IdleTimeout::new(stream, ctx.read_timeout),
        MessageCodec::new(ctx.max_line_length),
    ));

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = guard.close_token().cancelled() => break CloseReason::Closed,
            () = ctx.shutdown.cancelled() => break CloseReason::Closed,
            next = frames.next() => next,
        };

        let message = match next {
            None => break CloseReason::Eof,
            Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => break CloseReason::Idle,
            Some(Err(e)) => break CloseReason::Error(e),
            Some(Ok(message)) => message,
        };

        if process_line(message, &ctx).await == LineOutcome::Terminate {
            info!("Terminate received from {peer}; shutting down");
            ctx.shutdown.cancel();
            break CloseReason::Terminate;
        }
    };

    decrement_connections_active();
    match &reason {
        CloseReason::Error(_) => warn!("Connection {peer} closed: {reason}"),
        _ => debug!("Connection {peer} closed: {reason}"),
    }
    reason
}
