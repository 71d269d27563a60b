//! Per-connection processing.
//!
//! ## Structure
//!
//! - [`registry`] - Connection Set and admission cap.
//! - [`codec`] - Line framing and classification of raw socket bytes.
//! - [`processor`] - What a single classified line does to the server.
//! - [`timeout`] - Idle deadline on the socket, restarted by every read.
//! - [`worker`] - The read loop run for each admitted connection.

pub mod codec;
pub mod processor;
pub mod registry;
pub mod timeout;
pub mod worker;
