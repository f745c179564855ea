//! Process wiring: loads configuration, builds the store/engine, and spawns
//! either the Listener (one Supervisor per device) or the Janitor,
//! depending on `--service`.

use crate::cli::ServiceName;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::device::TcpDeviceSource;
use crate::engine::ReconciliationEngine;
use crate::janitor::Janitor;
use crate::lifecycle::Lifecycle;
use crate::store::Store;
use crate::store::mssql::{MssqlConnectOptions, MssqlStore};
use crate::supervisor::Supervisor;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub struct App {
    config: Config,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        if let Some(driver) = &config.mssql_odbc_driver {
            tracing::debug!(driver = %driver, "MSSQL_ODBC_DRIVER set but unused by the tiberius store");
        }

        let store = MssqlStore::connect(MssqlConnectOptions {
            server: config.mssql_server.clone(),
            database: config.mssql_database.clone(),
            user: config.mssql_user.clone(),
            password: config.mssql_password.clone(),
        })
        .await
        .context("failed to connect to MSSQL store")?;

        Ok(Self {
            config,
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
        })
    }

    /// Run the selected daemon until a shutdown signal arrives.
    pub async fn run(self, service: ServiceName, dry_run: bool) -> anyhow::Result<()> {
        let engine = Arc::new(ReconciliationEngine::new(self.store.clone(), self.clock.clone()));
        let mut lifecycle = Lifecycle::new();

        match service {
            ServiceName::Listener => {
                let devices = self.device_inventory()?;
                if devices.is_empty() {
                    tracing::warn!("no devices configured; listener has nothing to supervise");
                }
                for device_ip in devices {
                    let addr = format!("{device_ip}:{}", self.config.zk_port)
                        .parse()
                        .with_context(|| format!("invalid device address for {device_ip}"))?;
                    let source = TcpDeviceSource::new(addr);
                    let supervisor = Supervisor::new(
                        device_ip.clone(),
                        source,
                        engine.clone(),
                        self.clock.clone(),
                        self.config.tz_offset_hours(),
                    );
                    let shutdown_rx = lifecycle.shutdown_rx();
                    let handle = tokio::spawn(supervisor.run(shutdown_rx));
                    lifecycle.track(format!("supervisor:{device_ip}"), handle);
                }
            }
            ServiceName::Janitor => {
                let janitor = Janitor::new(
                    self.store.clone(),
                    engine.clone(),
                    self.clock.clone(),
                    self.config.cleanup_threshold_hours,
                    self.config.cleanup_interval_seconds as i64,
                    dry_run,
                );
                let shutdown_rx = lifecycle.shutdown_rx();
                let handle = tokio::spawn(janitor.run(shutdown_rx));
                lifecycle.track("janitor", handle);
            }
        }

        info!(service = ?service, "service started");
        lifecycle.run_until_signal().await;
        Ok(())
    }

    /// Device IP inventory. Device discovery proper -- the static or
    /// DB-driven registry behind `[EmpBook_db].[dbo].[Device]` -- is out of
    /// scope; this reads a simple comma-separated `DEVICE_IPS` env var as
    /// the minimal glue needed to spawn Supervisors in this port.
    fn device_inventory(&self) -> anyhow::Result<Vec<String>> {
        Ok(std::env::var("DEVICE_IPS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }
}
