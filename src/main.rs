use attendance_reconciler::app::App;
use attendance_reconciler::cli::Args;
use attendance_reconciler::config::Config;
use attendance_reconciler::logging::setup_logging;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    setup_logging(&config, args.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT_SHORT"),
        service = ?args.service,
        "starting attendance-reconciler"
    );

    let app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    match app.run(args.service, args.dry_run).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "service exited with error");
            ExitCode::FAILURE
        }
    }
}
