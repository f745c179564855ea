//! Process-wide cooperative shutdown, fanned out to every Supervisor task
//! and the Janitor task via a `tokio::sync::broadcast` channel -- the same
//! shape the teacher's service orchestration hands each service its own
//! `shutdown_rx`.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bounded join grace period before an unfinished worker is abandoned (§4.7).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the send half of the shutdown broadcast and the spawned worker
/// handles, so a caller can request a coordinated stop and wait (bounded)
/// for everyone to finish.
pub struct Lifecycle {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn track(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.handles.push((name.into(), handle));
    }

    /// Wait for `SIGINT`/`SIGTERM`, then broadcast stop and join every
    /// tracked task within [`SHUTDOWN_GRACE`], abandoning stragglers.
    pub async fn run_until_signal(mut self) {
        wait_for_signal().await;
        info!("shutdown signal received, stopping workers");
        let _ = self.shutdown_tx.send(());

        for (name, handle) in self.handles.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => info!(worker = %name, "worker stopped cleanly"),
                Ok(Err(e)) => warn!(worker = %name, error = %e, "worker task panicked"),
                Err(_) => warn!(worker = %name, "worker did not stop within grace period, abandoning"),
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
