//! Janitor: periodic sweep that closes ledger rows left open past
//! `CLEANUP_THRESHOLD_HOURS`, computing aligned run times and looping
//! with `tokio::select!` between `time::sleep` and the shutdown
//! broadcast.

use crate::clock::Clock;
use crate::domain::AUTO_CLEANUP;
use crate::engine::ReconciliationEngine;
use crate::store::Store;
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info, warn};

/// How often to wake and re-check the stop signal while waiting for the
/// next aligned run.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct Janitor {
    store: Arc<dyn Store>,
    engine: Arc<ReconciliationEngine>,
    clock: Arc<dyn Clock>,
    cleanup_threshold_hours: i64,
    /// `CLEANUP_INTERVAL_SECONDS`: the sweep is anchored to wall-clock
    /// multiples of this interval since midnight (e.g. the default 14400s/4h
    /// reproduces the {0,4,8,12,16,20} schedule from §4.6), so a non-default
    /// value actually changes the cadence rather than being read and ignored.
    cleanup_interval_seconds: i64,
    dry_run: bool,
}

impl Janitor {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<ReconciliationEngine>,
        clock: Arc<dyn Clock>,
        cleanup_threshold_hours: i64,
        cleanup_interval_seconds: i64,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            cleanup_threshold_hours,
            cleanup_interval_seconds,
            dry_run,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            threshold_hours = self.cleanup_threshold_hours,
            "janitor started"
        );

        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "janitor sweep cycle failed");
            }

            let wait = next_aligned_wait(self.clock.now(), self.cleanup_interval_seconds);
            let deadline = std::time::Instant::now() + wait;
            loop {
                if std::time::Instant::now() >= deadline {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("janitor received shutdown signal, exiting gracefully");
                        return;
                    }
                    _ = time::sleep(POLL_INTERVAL.min(
                        deadline.saturating_duration_since(std::time::Instant::now())
                    )) => {}
                }
            }
        }
    }

    /// One cleanup cycle: find every open row older than the threshold and
    /// close it with a synthetic `TimeOut`. A per-row failure is logged and
    /// the sweep continues -- one failing row never aborts the batch.
    async fn sweep(&self) -> anyhow::Result<()> {
        let threshold = self.clock.now() - ChronoDuration::hours(self.cleanup_threshold_hours);
        let rows = self
            .store
            .find_open_rows_older_than(threshold)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        if rows.is_empty() {
            return Ok(());
        }
        info!(count = rows.len(), threshold_hours = self.cleanup_threshold_hours, "found abandoned open rows");

        for row in &rows {
            let synthetic = match self.engine.synthesize_close(row).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(row_id = row.id, error = %e, "failed to compute synthetic TimeOut, skipping row");
                    continue;
                }
            };

            if self.dry_run {
                info!(row_id = row.id, employee_id = %row.employee_id, synthetic_time_out = %synthetic, "dry-run: would auto-close row");
                continue;
            }

            match self.store.update_close(row.id, synthetic, AUTO_CLEANUP).await {
                Ok(()) => {
                    info!(
                        row_id = row.id,
                        employee_id = %row.employee_id,
                        time_in = ?row.time_in,
                        time_out = %synthetic,
                        "cleaned abandoned record"
                    );
                }
                Err(e) => {
                    warn!(row_id = row.id, error = %e, "failed to close abandoned row, continuing sweep");
                }
            }
        }
        Ok(())
    }
}

/// Duration until the next wall-clock multiple of `interval_seconds` since
/// midnight. With the default `CLEANUP_INTERVAL_SECONDS` of 14400 (4h) this
/// reproduces the {0,4,8,12,16,20} aligned-hours schedule from §4.6; any
/// other configured interval shifts the cadence accordingly.
fn next_aligned_wait(now: NaiveDateTime, interval_seconds: i64) -> Duration {
    let interval_seconds = interval_seconds.max(1);
    let midnight = now.date().and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    let elapsed = (now - midnight).num_seconds();
    let next_boundary = (elapsed / interval_seconds + 1) * interval_seconds;
    let next_run = midnight + ChronoDuration::seconds(next_boundary);
    let wait = next_run - now;
    wait.to_std().unwrap_or(Duration::from_secs(0))
}
