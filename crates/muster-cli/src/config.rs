use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI for muster
#[derive(Parser, Debug)]
#[command(
    name = "muster",
    version,
    about = "Start a local service stack in dependency and health order"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start services and stream their output until Ctrl+C
    Up {
        /// Topology file (TOML)
        #[arg(short, long, env = "MUSTER_FILE")]
        file: Option<PathBuf>,

        /// Env file layered under the process environment
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Seconds between the stop signal and a forced kill
        #[arg(long)]
        kill_timeout: Option<u64>,

        /// Directory for the status report
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Services to start, with their dependencies. All when empty
        services: Vec<String>,
    },
    /// Validate the topology and print it resolved
    Config {
        /// Topology file (TOML)
        #[arg(short, long, env = "MUSTER_FILE")]
        file: Option<PathBuf>,

        /// Env file layered under the process environment
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the last status report of `muster up`
    Status {
        /// Directory for the status report
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Print the raw report
        #[arg(long)]
        json: bool,
    },
}
