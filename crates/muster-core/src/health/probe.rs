use std::process::Stdio;

use async_trait::async_trait;
use muster_types::Probe;
use tokio::{net::TcpStream, process::Command};

use crate::{
    error::{Error, Result},
    CommandSpec,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Runs a single health probe.
///
/// Implementations never fail: a probe that cannot even be executed is an
/// unhealthy result like any other.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `service` carries the environment and working directory of the
    /// probed service; command probes run with them.
    async fn check(&self, probe: &Probe, service: &CommandSpec) -> ProbeOutcome;
}

/// Probes against the real system: child processes, HTTP and TCP.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    client: reqwest::Client,
}

impl SystemProbe {
    /// # Errors
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("muster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Internal(format!("http client: {err}")))?;
        Ok(Self { client })
    }

    async fn run(&self, argv: &[String], service: &CommandSpec) -> ProbeOutcome {
        let Some((program, args)) = argv.split_first() else {
            return ProbeOutcome::Unhealthy("empty probe command".to_owned());
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(service.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &service.cwd {
            cmd.current_dir(dir);
        }

        match cmd.status().await {
            Ok(status) if status.success() => ProbeOutcome::Healthy,
            Ok(status) => ProbeOutcome::Unhealthy(format!("probe exited with {status}")),
            Err(err) => ProbeOutcome::Unhealthy(format!("failed to run `{program}`: {err}")),
        }
    }

    async fn get(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => ProbeOutcome::Unhealthy(format!("GET {url}: {}", response.status())),
            Err(err) => ProbeOutcome::Unhealthy(format!("GET {url}: {err}")),
        }
    }
}

#[async_trait]
impl HealthProbe for SystemProbe {
    async fn check(&self, probe: &Probe, service: &CommandSpec) -> ProbeOutcome {
        match probe {
            Probe::Cmd(argv) => self.run(argv, service).await,
            Probe::Shell(script) => {
                let argv = ["sh".to_owned(), "-c".to_owned(), script.clone()];
                self.run(&argv, service).await
            }
            Probe::Http(url) => self.get(url).await,
            Probe::Tcp { host, port } => match TcpStream::connect((host.as_str(), *port)).await {
                Ok(_) => ProbeOutcome::Healthy,
                Err(err) => ProbeOutcome::Unhealthy(format!("connect {host}:{port}: {err}")),
            },
        }
    }
}
