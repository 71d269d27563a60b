#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, ServerConfig},
    reporter::{PeriodicReporter, ReportSchedule},
    service::supervisor::{IngestServer, ShutdownSummary},
};
