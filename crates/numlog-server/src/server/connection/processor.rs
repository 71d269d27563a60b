use crate::server::{
    context::ServerContext,
    telemetry::{increment_records_duplicate, increment_records_malformed, increment_records_unique},
};
use numlog_core::{Classification, Ledger, Message, Record};
use tracing::{trace, warn};

/// What a single line did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// The line carried the shutdown token. The caller raises the shutdown
    /// flag and stops reading.
    Terminate,
    /// First sighting; the record was queued for the log.
    Unique(Record),
    /// Seen before; only the duplicate counter moved.
    Duplicate(Record),
    /// Neither a record nor the token. Nothing changed.
    Malformed,
}

/// Applies one classified line to the ledger and the writer.
///
/// Unique records are persisted best effort: if the writer has already
/// stopped the record is logged as dropped but stays counted, since the ledger
/// decision is final.
pub async fn process_line(message: Message, ctx: &ServerContext) -> LineOutcome {
    match message {
        Message::Terminate => LineOutcome::Terminate,
        Message::Malformed => {
            increment_records_malformed();
            LineOutcome::Malformed
        }
        Message::Record(record) => match ctx.ledger.classify(&record) {
            Classification::Unique => {
                increment_records_unique();
                if let Err(e) = ctx.writer.enqueue(record).await {
                    warn!("Dropping unique record {record}: {e}");
                }
                LineOutcome::Unique(record)
            }
            Classification::Duplicate => {
                increment_records_duplicate();
                trace!("Duplicate record {record}");
                LineOutcome::Duplicate(record)
            }
        },
    }
}
