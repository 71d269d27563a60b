use clap::Parser;
use core::time::Duration;
use numlog_core::{Error, Ledger, LockLedger, RECORD_LEN, ShardedLedger};
use std::{path::PathBuf, sync::Arc};

/// Runtime configuration for the `numlog-server` binary.
///
/// These settings control admission, timeouts, persistence and reporting of
/// the ingestion service. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is honoured), with defaults matching
/// the classic deployment: port 4000, five clients, `numbers.log`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "numlog-server",
    version,
    about = "A TCP service that deduplicates and persists nine digit records"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Example: "0.0.0.0:4000" or "127.0.0.1:9000"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:4000"))]
    pub server_addr: String,

    /// Maximum number of concurrently serviced client connections.
    ///
    /// Connections beyond this cap are accepted at the TCP level and closed
    /// immediately, without reading from them.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: usize,

    /// Seconds of read inactivity after which a client connection is dropped.
    ///
    /// Environment variable: `READ_TIMEOUT_SECS`
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// File receiving one unique record per line. Truncated at startup.
    ///
    /// Environment variable: `LOG_FILE`
    #[arg(long, env = "LOG_FILE", default_value = "numbers.log")]
    pub log_file: PathBuf,

    /// Delay before the first statistics report, in seconds.
    ///
    /// Environment variable: `REPORT_DELAY_SECS`
    #[arg(long, env = "REPORT_DELAY_SECS", default_value_t = 5)]
    pub report_delay_secs: u64,

    /// Period between statistics reports, in seconds.
    ///
    /// Environment variable: `REPORT_INTERVAL_SECS`
    #[arg(long, env = "REPORT_INTERVAL_SECS", default_value_t = 10)]
    pub report_interval_secs: u64,

    /// Capacity of the queue between connections and the file writer.
    ///
    /// `0` makes the queue unbounded so producers never wait. Any other value
    /// bounds it, and connections wait for space when the writer falls behind.
    ///
    /// Environment variable: `WRITER_QUEUE_CAPACITY`
    #[arg(long, env = "WRITER_QUEUE_CAPACITY", default_value_t = 0)]
    pub writer_queue_capacity: usize,

    /// Upper bound, in seconds, for each shutdown phase (connection drain and
    /// writer drain).
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Number of independently locked ledger shards. `1` uses a single lock.
    ///
    /// Environment variable: `LEDGER_SHARDS`
    #[arg(long, env = "LEDGER_SHARDS", default_value_t = 1)]
    pub ledger_shards: usize,

    /// Longest accepted line in bytes. Longer lines are discarded as
    /// malformed.
    ///
    /// Environment variable: `MAX_LINE_LENGTH`
    #[arg(long, env = "MAX_LINE_LENGTH", default_value_t = 1024)]
    pub max_line_length: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub log_file: PathBuf,
    pub report_delay: Duration,
    pub report_interval: Duration,
    /// `None` for an unbounded writer queue.
    pub writer_queue_capacity: Option<usize>,
    pub shutdown_timeout: Duration,
    pub ledger_shards: usize,
    pub max_line_length: usize,
}

impl ServerConfig {
    /// Rejects values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> numlog_core::Result<()> {
        let reject = |reason: String| -> numlog_core::Result<()> { Err(Error::Config { reason }) };

        if self.max_connections == 0 {
            return reject("max_connections must be greater than 0".to_string());
        }
        if self.read_timeout.is_zero() {
            return reject("read_timeout must be greater than 0".to_string());
        }
        if self.report_interval.is_zero() {
            return reject("report_interval must be greater than 0".to_string());
        }
        if self.ledger_shards == 0 {
            return reject("ledger_shards must be greater than 0".to_string());
        }
        // A record line is nine digits, optionally followed by `\r`.
        if self.max_line_length < RECORD_LEN + 1 {
            return reject(format!(
                "max_line_length ({}) must be at least {}",
                self.max_line_length,
                RECORD_LEN + 1
            ));
        }
        if self.log_file.as_os_str().is_empty() {
            return reject("log_file must not be empty".to_string());
        }
        Ok(())
    }

    /// Builds the dedup ledger selected by `ledger_shards`.
    pub fn build_ledger(&self) -> numlog_core::Result<Arc<dyn Ledger>> {
        if self.ledger_shards <= 1 {
            Ok(Arc::new(LockLedger::new()))
        } else {
            Ok(Arc::new(ShardedLedger::new(self.ledger_shards)?))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:4000"),
            max_connections: 5,
            read_timeout: Duration::from_secs(30),
            log_file: PathBuf::from("numbers.log"),
            report_delay: Duration::from_secs(5),
            report_interval: Duration::from_secs(10),
            writer_queue_capacity: None,
            shutdown_timeout: Duration::from_secs(5),
            ledger_shards: 1,
            max_line_length: 1024,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let config = Self {
            server_addr: args.server_addr,
            max_connections: args.max_connections,
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            log_file: args.log_file,
            report_delay: Duration::from_secs(args.report_delay_secs),
            report_interval: Duration::from_secs(args.report_interval_secs),
            writer_queue_capacity: (args.writer_queue_capacity > 0)
                .then_some(args.writer_queue_capacity),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            ledger_shards: args.ledger_shards,
            max_line_length: args.max_line_length,
        };
        config.validate()?;
        Ok(config)
    }
}
