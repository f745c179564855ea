//! Process CLI surface, parsed with `clap::Parser`.

use clap::{Parser, ValueEnum};

/// Which daemon this process instance runs. Listener and Janitor are
/// independent roles sharing one database -- a single process runs
/// exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceName {
    Listener,
    Janitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "attendance-reconciler", version, about)]
pub struct Args {
    /// Which daemon to run.
    #[arg(long, value_enum)]
    pub service: ServiceName,

    /// Log output format; overrides `LOG_FORMAT` when given.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Janitor only: compute and log what would be closed without writing.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
