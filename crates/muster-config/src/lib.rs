mod adapter;
mod env;
mod interpolate;
mod raw;

use std::path::Path;

pub use adapter::SUPPORTED_VERSION;
pub use env::Environment;
pub use muster_types::Project;

/// File name looked up next to the topology when no env file is given.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Error type for configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[cfg(feature = "toml")]
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error(s): {0}")]
    Validation(String),

    #[error("missing variable `{name}`{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    MissingVariable {
        name: String,
        message: Option<String>,
    },

    #[error("interpolation error: {0}")]
    Interpolation(String),
}

/// Load a project configuration from a file path.
///
/// Variables come from the process environment layered over the `.env` file
/// next to the topology, when there is one.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration file cannot be read or parsed.
pub fn load_from_path(path: &Path) -> Result<Project, ConfigError> {
    let mut env = Environment::from_process();

    let env_file = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(DEFAULT_ENV_FILE);
    if env_file.is_file() {
        env = env.with_env_file(&env_file)?;
    }

    load_with_env(path, &env)
}

/// Load a project configuration, resolving variables against `env`.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration file cannot be read or parsed.
pub fn load_with_env(path: &Path, env: &Environment) -> Result<Project, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_auto(&text, path, env)
}

/// Parse a project configuration from a string.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration string cannot be parsed.
pub fn parse_auto(text: &str, path: &Path, env: &Environment) -> Result<Project, ConfigError> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml")]
        "toml" => parse_toml(text, path, env),
        _ => Err(ConfigError::Validation("unknown config extension".into())),
    }
}

/// Parse a project configuration from a TOML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration string cannot be parsed.
#[cfg(feature = "toml")]
pub fn parse_toml(config: &str, path: &Path, env: &Environment) -> Result<Project, ConfigError> {
    let raw_project = toml::from_str::<raw::RawProject>(config)?;
    raw_project.to_project(path, env)
}
