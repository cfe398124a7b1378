mod config;
mod status;
mod up;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use muster_config::{load_with_env, Environment, Project, DEFAULT_ENV_FILE};

pub use config::config;
pub use status::status;
pub use up::up;

pub const DEFAULT_FILENAMES: [&str; 2] = ["muster.toml", ".muster.toml"];
pub const DEFAULT_STATE_DIR: &str = ".muster";

fn topology_path(file: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file);
    }
    for filename in DEFAULT_FILENAMES {
        if Path::new(filename).exists() {
            return Ok(PathBuf::from(filename));
        }
    }
    bail!(
        "no topology file found (looked for {}), pass one with --file",
        DEFAULT_FILENAMES.join(", ")
    )
}

/// Load the topology, resolving variables from the process environment
/// layered over the env file.
fn load_project(file: Option<PathBuf>, env_file: Option<PathBuf>) -> Result<Project> {
    let path = topology_path(file)?;

    let mut env = Environment::from_process();
    let env_file = env_file.or_else(|| {
        let sibling = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_ENV_FILE);
        sibling.is_file().then_some(sibling)
    });
    if let Some(env_file) = env_file {
        tracing::debug!("Reading variables from {}", env_file.display());
        env = env
            .with_env_file(&env_file)
            .with_context(|| format!("failed to read {}", env_file.display()))?;
    }

    load_with_env(&path, &env).with_context(|| format!("invalid topology {}", path.display()))
}
