//! Entry point for the sf-attachments-downloader CLI

use anyhow::Context;
use clap::Parser;
use sf_attachments_downloader::cli::{print_summary, summary_exit_code, Cli, CliError};
use sf_attachments_downloader::logging::{init_logging, DisplayCoordinator};
use sf_attachments_downloader::metrics::init_metrics;
use sf_attachments_downloader::shutdown::{SharedStop, StopReason, StopSignal};
use tracing::{error, info, warn};

fn install_logging(cli: &Cli, coordinator: &DisplayCoordinator) -> anyhow::Result<()> {
    let log_file = init_logging(&cli.logging_config(), coordinator)
        .context("failed to initialize logging")?;
    info!("Log file: {}", log_file.display());
    Ok(())
}

fn spawn_ctrl_c_handler(stop: SharedStop) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received - stopping after in-flight downloads...");
            stop.request_stop(StopReason::Interrupted);
        }
    });
}

#[tokio::main]
async fn main() {
    // Missing .env is fine; flags and the environment still apply
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let coordinator = DisplayCoordinator::new();
    if let Err(e) = install_logging(&cli, &coordinator) {
        eprintln!("Error: {e:#}");
        std::process::exit(CliError::ConfigurationError(e.to_string()).exit_code());
    }

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = init_metrics(addr) {
            error!("{}", e);
            std::process::exit(CliError::from(e).exit_code());
        }
    }

    let stop = StopSignal::shared();
    spawn_ctrl_c_handler(stop.clone());

    let code = match cli.execute(&coordinator, stop).await {
        Ok(summary) => {
            print_summary(cli.output_format, &summary);
            summary_exit_code(&summary)
        }
        Err(e) => {
            error!("Command failed: {}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}
