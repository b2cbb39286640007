//! Loanbook admin CLI entry point.

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use loanbook_admin::cli::{Cli, run_command_with_writer};
use loanbook_admin::error::AppError;
use loanbook_admin::state::AppState;
use loanbook_event_store::config::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = EngineConfig::from_env()?;
    let pool = config.connect().await?;
    let state = AppState::new(pool, config)?;

    run_command_with_writer(&state, cli.command, Utc::now(), &mut std::io::stdout().lock()).await?;
    state.metrics.flush().await;
    Ok(())
}
