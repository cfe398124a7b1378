use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod logger;
mod state;

const LOG_ENV: &str = "MUSTER_LOG";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("muster=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    init_tracing();

    match cli.command {
        config::Commands::Up {
            file,
            env_file,
            kill_timeout,
            state_dir,
            services,
        } => commands::up(file, env_file, kill_timeout, state_dir, services).await,
        config::Commands::Config {
            file,
            env_file,
            json,
        } => commands::config(file, env_file, json),
        config::Commands::Status { state_dir, json } => commands::status(state_dir, json),
    }
}
