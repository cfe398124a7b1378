use std::time::Duration;

use crate::{gate::Blocker, ExitStatus, ServiceStatus};

#[derive(Debug)]
pub(crate) enum SupervisorCommand {
    Up {
        services: Vec<String>,
    },
    Down,
    ProcessExited {
        service: String,
        generation: u64,
        status: ExitStatus,
    },
    HealthReport {
        service: String,
        generation: u64,
        status: Option<ServiceStatus>,
        failures: u32,
    },
    Restart {
        service: String,
        generation: u64,
    },
    StallCheck {
        service: String,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Log {
        service: String,
        message: String,
    },
    StatusChanged {
        service: String,
        from: ServiceStatus,
        to: ServiceStatus,
    },
    /// A pending service is stuck behind dependencies that did not reach
    /// their condition.
    Blocked {
        service: String,
        blockers: Vec<Blocker>,
    },
    Restarting {
        service: String,
        attempt: u32,
        delay: Duration,
    },
    ProjectStopped,
    Error {
        message: String,
    },
}
