//! Periodic statistics reporting.
//!
//! [`PeriodicReporter`] owns a background task that snapshots the ledger on a
//! fixed schedule, logs the resulting line at `info` and publishes it to any
//! in-process subscribers.

use core::time::Duration;
use numlog_core::{Ledger, WindowStats};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Buffered reports per subscriber before the slowest one starts lagging.
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// When reports fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    /// Delay between [`PeriodicReporter::start`] and the first report.
    pub initial_delay: Duration,
    /// Period between subsequent reports.
    pub interval: Duration,
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(10),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Emits `Received {unique} unique numbers, {duplicates} duplicates. Unique
/// total: {total}` on a schedule.
///
/// The reporter is either stopped or running. [`start`](Self::start) and
/// [`stop`](Self::stop) are idempotent.
pub struct PeriodicReporter {
    ledger: Arc<dyn Ledger>,
    schedule: ReportSchedule,
    reports: broadcast::Sender<WindowStats>,
    running: Mutex<Option<Running>>,
}

impl PeriodicReporter {
    pub fn new(ledger: Arc<dyn Ledger>, schedule: ReportSchedule) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            ledger,
            schedule,
            reports,
            running: Mutex::new(None),
        }
    }

    /// Snapshots and resets the ledger window, logs the report line and
    /// publishes it.
    pub fn report(&self) -> WindowStats {
        publish(self.ledger.as_ref(), &self.reports)
    }

    /// Receives every report emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WindowStats> {
        self.reports.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Schedules reports on the current runtime. Returns `false` if the
    /// reporter was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(report_loop(
            Arc::clone(&self.ledger),
            self.schedule,
            self.reports.clone(),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, task });

        debug!(
            "Reporter started: first report in {:?}, then every {:?}",
            self.schedule.initial_delay, self.schedule.interval
        );
        true
    }

    /// Cancels future reports and waits for the task to exit. A report already
    /// in progress completes first; none fires after this returns. Returns
    /// `false` if the reporter was not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        let Some(Running { cancel, task }) = running else {
            return false;
        };

        cancel.cancel();
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Reporter task panicked: {e}");
            }
        }

        debug!("Reporter stopped");
        true
    }
}

fn publish(ledger: &dyn Ledger, reports: &broadcast::Sender<WindowStats>) -> WindowStats {
    let stats = ledger.snapshot_and_reset();
    info!("{stats}");
    // No subscribers is fine.
    let _ = reports.send(stats);
    stats
}

async fn report_loop(
    ledger: Arc<dyn Ledger>,
    schedule: ReportSchedule,
    reports: broadcast::Sender<WindowStats>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + schedule.initial_delay, schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                publish(ledger.as_ref(), &reports);
            }
        }
    }
}
