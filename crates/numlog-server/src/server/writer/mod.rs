//! Single-consumer persistence of accepted records.
//!
//! Every connection holds a cloned [`handle::WriterHandle`] and enqueues the
//! records it classified as unique. One dedicated task, [`worker::writer_loop`],
//! owns the log file and is its only writer, so lines are never interleaved.
//!
//! ## Structure
//!
//! - [`request`] - Messages carried by the writer queue.
//! - [`handle`] - Producer side: creation, enqueue, bounded shutdown.
//! - [`worker`] - Consumer side: the batching write loop.

pub mod handle;
pub mod request;
pub mod worker;
