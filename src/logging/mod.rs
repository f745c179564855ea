//! Tracing setup: an `EnvFilter` seeded from `LOG_LEVEL`, with a pretty or
//! JSON formatter selectable via `LOG_FORMAT` / `--log-format`.

use crate::cli::LogFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;

/// Configure and install the global tracing subscriber.
pub fn setup_logging(config: &Config, cli_format: Option<LogFormat>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        EnvFilter::new(format!(
            "warn,attendance_reconciler={level}"
        ))
    });

    let format = cli_format.unwrap_or_else(|| match config.log_format.as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    });

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_target(true)
                .json()
                .with_env_filter(filter)
                .init();
        }
    }
}
