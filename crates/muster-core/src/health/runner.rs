use std::sync::Arc;

use muster_types::HealthCheck;
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    health::{HealthProbe, HealthTracker, ProbeOutcome},
    supervisor::SupervisorCommand,
    CommandSpec,
};

/// Periodic probe loop for one process lifetime of a service.
///
/// The first probe fires one `interval` after launch. A probe running longer
/// than `timeout` is dropped and counted as a failure.
pub(crate) struct HealthProbeLoop {
    pub service: String,
    pub generation: u64,
    pub check: HealthCheck,
    pub spec: CommandSpec,
    pub prober: Arc<dyn HealthProbe>,
    pub commands_tx: mpsc::Sender<SupervisorCommand>,
    pub cancel: CancellationToken,
    pub launched_at: Instant,
}

impl HealthProbeLoop {
    pub fn spawn(self) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    async fn run(self) {
        let mut tracker = HealthTracker::new(&self.check);
        let mut ticker = interval_at(self.launched_at + self.check.interval, self.check.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let probed_at = tokio::select! {
                () = self.cancel.cancelled() => break,
                at = ticker.tick() => at,
            };

            let outcome = tokio::select! {
                () = self.cancel.cancelled() => break,
                res = timeout(self.check.timeout, self.prober.check(&self.check.probe, &self.spec)) => {
                    res.unwrap_or_else(|_| {
                        ProbeOutcome::Unhealthy(format!(
                            "timed out after {}",
                            humantime::format_duration(self.check.timeout)
                        ))
                    })
                }
            };

            let failures = tracker.failures();
            let changed = tracker.record(
                outcome.is_healthy(),
                probed_at.saturating_duration_since(self.launched_at),
            );
            if let ProbeOutcome::Unhealthy(reason) = &outcome {
                tracing::debug!(
                    service = %self.service,
                    failures = tracker.failures(),
                    "health probe failed: {reason}"
                );
            }
            if changed.is_none() && failures == tracker.failures() {
                continue;
            }

            let report = SupervisorCommand::HealthReport {
                service: self.service.clone(),
                generation: self.generation,
                status: changed,
                failures: tracker.failures(),
            };
            if self.commands_tx.send(report).await.is_err() {
                break;
            }
        }

        tracing::trace!(service = %self.service, "health probe loop finished");
    }
}
