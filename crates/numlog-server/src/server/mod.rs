//! Server internals.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`telemetry`] - Logging setup and optional OpenTelemetry export.
//! - [`context`] - State shared by every connection worker.
//! - [`writer`] - Single-consumer persistence of unique records.
//! - [`reporter`] - Periodic statistics line.
//! - [`connection`] - Admission, framing and the per-connection read loop.
//! - [`service`] - The supervisor: accept loop and shutdown sequence.

pub mod config;
pub mod connection;
pub mod context;
pub mod reporter;
pub mod service;
pub mod telemetry;
pub mod writer;
