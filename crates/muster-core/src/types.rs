use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::process_manager::ExitStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Not launched yet, waiting for its dependencies.
    #[default]
    Pending,
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

impl ServiceStatus {
    /// The process has been launched at least once.
    #[must_use]
    pub fn has_started(self) -> bool {
        self != ServiceStatus::Pending
    }

    /// A process is currently alive for this service.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting | ServiceStatus::Healthy | ServiceStatus::Unhealthy
        )
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One row of the status table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    /// Number of launch attempts, restarts included.
    pub launches: u32,
    pub restarts: u32,
    /// Consecutive failed probes counted toward the retry threshold.
    pub failures: u32,
    pub last_exit: Option<ExitStatus>,
    /// A restart is scheduled, so `Stopped` is not final.
    pub restart_pending: bool,
    /// Reported as blocked on its dependencies.
    pub stalled: bool,
}
