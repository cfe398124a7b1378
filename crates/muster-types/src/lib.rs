use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub const DEFAULT_ON_FAILURE_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub version: u32,
    pub name: String,
    /// Directory the topology was loaded from. Relative `cwd`s resolve against it.
    pub root: PathBuf,
    pub settings: Settings,
    pub services: BTreeMap<String, Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub deps: Vec<Dependency>,
    pub healthcheck: Option<HealthCheck>,
    pub restart: Restart,
}

impl Service {
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.deps.iter().map(|d| d.service.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub service: String,
    pub condition: Condition,
}

/// What a dependency has to reach before its dependent may launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Started,
    Healthy,
    CompletedSuccessfully,
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Started => write!(f, "started"),
            Condition::Healthy => write!(f, "healthy"),
            Condition::CompletedSuccessfully => write!(f, "completed_successfully"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub probe: Probe,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retries: u32,
    /// Failures inside this window after launch do not count toward `retries`.
    #[serde(with = "humantime_serde")]
    pub start_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Executed directly, exit code 0 is healthy.
    Cmd(Vec<String>),
    /// Run through `sh -c`, exit code 0 is healthy.
    Shell(String),
    /// HTTP GET, any 2xx is healthy.
    Http(String),
    /// Healthy once a TCP connection can be established.
    Tcp { host: String, port: u16 },
}

impl Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Cmd(argv) => write!(f, "{}", argv.join(" ")),
            Probe::Shell(script) => write!(f, "sh -c {script:?}"),
            Probe::Http(url) => write!(f, "GET {url}"),
            Probe::Tcp { host, port } => write!(f, "tcp {host}:{port}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Restart {
    #[default]
    Never,
    OnFailure { max_retries: u32 },
    Always { max_retries: Option<u32> },
}

impl Restart {
    /// Whether an exit should be followed by another launch, given how many
    /// restarts already happened.
    #[must_use]
    pub fn allows(&self, failed: bool, restarts: u32) -> bool {
        match *self {
            Restart::Never => false,
            Restart::OnFailure { max_retries } => failed && restarts < max_retries,
            Restart::Always { max_retries } => max_retries.map_or(true, |max| restarts < max),
        }
    }
}

impl Display for Restart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Restart::Never => write!(f, "no"),
            Restart::OnFailure { max_retries } => write!(f, "on-failure:{max_retries}"),
            Restart::Always { max_retries: None } => write!(f, "always"),
            Restart::Always {
                max_retries: Some(max),
            } => write!(f, "always:{max}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// How long a service may sit in `pending` before it is reported as blocked.
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,
    /// Grace period between the stop signal and a forced kill.
    #[serde(with = "humantime_serde")]
    pub kill_timeout: Duration,
    pub restart_backoff: Backoff,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(60),
            kill_timeout: Duration::from_secs(10),
            restart_backoff: Backoff::default(),
        }
    }
}

/// Bounded exponential backoff between restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Backoff {
    #[serde(with = "humantime_serde")]
    pub base: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before restart number `attempt` (zero based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}
