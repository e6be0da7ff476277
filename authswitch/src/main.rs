mod cli;
mod commands;

use anyhow::Context;
use authswitch::{
    config::AppConfig,
    logging::{self, LOG_RETENTION_DAYS, LoggingOptions},
};
use clap::Parser;
use tracing::{debug, warn};

use crate::{cli::Args, commands::CommandExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    let log_dir = config.logging.file_logging.then(|| config.log_dir());
    let _log_guard = logging::init_logging(&LoggingOptions {
        filter: config.logging.filter.clone(),
        verbose: args.verbose,
        log_dir: log_dir.clone(),
    })?;
    if let Some(dir) = &log_dir {
        if let Err(e) = logging::cleanup_old_logs(dir, LOG_RETENTION_DAYS).await {
            warn!(error = %e, "Failed to clean up old log files");
        }
    }
    debug!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let executor = CommandExecutor::new(config, args.output);
    // Every start replays or discards a switch left pending by an earlier run.
    let recovery = executor.recover_on_startup().await;

    executor.execute(args.command, recovery).await
}
