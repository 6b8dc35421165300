use std::process::ExitCode;

use clap::Parser;
use cli::model::Cli;
use tracing::error;
use tracing_subscriber::EnvFilter;

pub mod api;
pub mod bitpack;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod datalog;
pub mod poller;
pub mod powerwall;
pub mod state;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("solarlink=info")),
        )
        .init();

    match Cli::parse().dispatch().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
