use std::time::Duration;

use muster_types::HealthCheck;

use crate::ServiceStatus;

/// Folds probe outcomes of one process lifetime into a health status.
///
/// Starts in `starting`. Any success makes the service healthy and clears the
/// failure count. Failures inside the start period are ignored; outside it
/// they accumulate, and reaching `retries` consecutive failures makes the
/// service unhealthy.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    retries: u32,
    start_period: Duration,
    failures: u32,
    status: ServiceStatus,
}

impl HealthTracker {
    #[must_use]
    pub fn new(check: &HealthCheck) -> Self {
        Self {
            retries: check.retries.max(1),
            start_period: check.start_period,
            failures: 0,
            status: ServiceStatus::Starting,
        }
    }

    /// Record one probe result taken `since_launch` after the process was
    /// launched. Returns the new status if it changed.
    pub fn record(&mut self, healthy: bool, since_launch: Duration) -> Option<ServiceStatus> {
        let next = if healthy {
            self.failures = 0;
            ServiceStatus::Healthy
        } else {
            if since_launch < self.start_period {
                return None;
            }
            self.failures = self.failures.saturating_add(1);
            if self.failures >= self.retries {
                ServiceStatus::Unhealthy
            } else {
                self.status
            }
        };

        if next == self.status {
            return None;
        }
        self.status = next;
        Some(next)
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    /// Consecutive failures counted toward `retries`.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
