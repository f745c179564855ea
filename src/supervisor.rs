//! Device Stream Supervisor: one long-running `tokio::task` per terminal.
//! `run()` races the terminal read against the shutdown broadcast with
//! `tokio::select!`.

use crate::clock::Clock;
use crate::device::{DeviceEventSource, normalize};
use crate::engine::ReconciliationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

/// Backoff between reconnect attempts after a transport fault.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
/// Bounded terminal connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Supervisor<D: DeviceEventSource> {
    device_ip: String,
    source: D,
    engine: Arc<ReconciliationEngine>,
    clock: Arc<dyn Clock>,
    tz_offset_hours: i64,
}

impl<D: DeviceEventSource> Supervisor<D> {
    pub fn new(
        device_ip: String,
        source: D,
        engine: Arc<ReconciliationEngine>,
        clock: Arc<dyn Clock>,
        tz_offset_hours: i64,
    ) -> Self {
        Self {
            device_ip,
            source,
            engine,
            clock,
            tz_offset_hours,
        }
    }

    /// Runs until `shutdown_rx` fires, cooperatively stopping at every
    /// natural yield point: the connect attempt, each event read, and the
    /// reconnect backoff sleep.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(device_ip = %self.device_ip, "device supervisor started");

        'outer: loop {
            let connected = tokio::select! {
                _ = shutdown_rx.recv() => break 'outer,
                result = time::timeout(CONNECT_TIMEOUT, self.source.connect()) => result,
            };

            match connected {
                Ok(Ok(())) => {
                    debug!(device_ip = %self.device_ip, "connected to terminal");
                }
                Ok(Err(e)) => {
                    warn!(device_ip = %self.device_ip, error = %e, "terminal connect failed, backing off");
                    if self.sleep_or_stop(&mut shutdown_rx, RECONNECT_BACKOFF).await {
                        break 'outer;
                    }
                    continue 'outer;
                }
                Err(_) => {
                    warn!(device_ip = %self.device_ip, "terminal connect timed out, backing off");
                    if self.sleep_or_stop(&mut shutdown_rx, RECONNECT_BACKOFF).await {
                        break 'outer;
                    }
                    continue 'outer;
                }
            }

            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        self.source.close().await;
                        break 'outer;
                    }
                    event = self.source.next_event() => event,
                };

                match event {
                    Ok(None) => continue, // heartbeat/keepalive
                    Ok(Some(raw)) => {
                        let clock = self.clock.clone();
                        let Some(punch) = normalize(raw, &self.device_ip, self.tz_offset_hours, move || clock.now())
                        else {
                            debug!(device_ip = %self.device_ip, "dropped malformed punch (blank employee id)");
                            continue;
                        };
                        match self.engine.process(punch).await {
                            Ok(outcome) => {
                                debug!(device_ip = %self.device_ip, did_mutate = outcome.did_mutate(), "punch processed");
                            }
                            Err(e) if e.is_transient() => {
                                warn!(device_ip = %self.device_ip, error = %e, "transient store error, dropping punch");
                            }
                            Err(e) => {
                                warn!(device_ip = %self.device_ip, error = %e, "permanent store error, dropping punch");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(device_ip = %self.device_ip, error = %e, "terminal transport error, reconnecting");
                        self.source.close().await;
                        if self.sleep_or_stop(&mut shutdown_rx, RECONNECT_BACKOFF).await {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                }
            }
        }

        self.source.close().await;
        info!(device_ip = %self.device_ip, "device supervisor stopped");
    }

    /// Sleep for `dur`, observing shutdown. Returns `true` if shutdown fired
    /// during the sleep.
    async fn sleep_or_stop(&self, shutdown_rx: &mut broadcast::Receiver<()>, dur: Duration) -> bool {
        tokio::select! {
            _ = shutdown_rx.recv() => true,
            _ = time::sleep(dur) => false,
        }
    }
}
