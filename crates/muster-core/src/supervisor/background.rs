use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::StreamExt;
use muster_types::{Project, Service};
use tokio::{
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    gate,
    health::{HealthProbe, HealthProbeLoop},
    process_manager::BoxStream,
    status::StatusTable,
    supervisor::commands::{SupervisorCommand, SupervisorEvent},
    topology::start_order,
    CommandSpec, ExitStatus, ProcId, ProcessManager, ServiceState, ServiceStatus,
};

/// Exit status recorded when a service could not be spawned at all.
const SPAWN_FAILED: ExitStatus = ExitStatus::Code(127);

#[derive(Debug, Default)]
struct Runtime {
    /// Bumped on every launch, exit and teardown, so messages about an older
    /// process are recognized and dropped.
    generation: u64,
    proc_id: Option<ProcId>,
    cancel: Option<CancellationToken>,
}

pub struct SupervisorBackground<P: ProcessManager> {
    process_manager: P,
    prober: Arc<dyn HealthProbe>,
    project: Project,
    /// Dependency-first order of every service in the project.
    order: Vec<String>,
    table: StatusTable,
    runtime: HashMap<String, Runtime>,
    /// Services requested by `up`, dependencies included.
    selected: HashSet<String>,
    /// Parent of every timer, probe loop and exit watcher.
    root: CancellationToken,

    commands_tx: mpsc::Sender<SupervisorCommand>,
    commands_rx: mpsc::Receiver<SupervisorCommand>,

    output_tx: mpsc::Sender<SupervisorEvent>,
}

impl<P: ProcessManager> SupervisorBackground<P> {
    pub fn new(
        project: Project,
        order: Vec<String>,
        process_manager: P,
        prober: Arc<dyn HealthProbe>,
        table: StatusTable,
        commands_tx: mpsc::Sender<SupervisorCommand>,
        commands_rx: mpsc::Receiver<SupervisorCommand>,
    ) -> (Self, mpsc::Receiver<SupervisorEvent>) {
        tracing::info!("SupervisorBackground initialized for project `{}`", project.name);

        let (output_tx, output_rx) = mpsc::channel(100);
        (
            Self {
                process_manager,
                prober,
                project,
                order,
                table,
                runtime: HashMap::new(),
                selected: HashSet::new(),
                root: CancellationToken::new(),
                commands_tx,
                commands_rx,
                output_tx,
            },
            output_rx,
        )
    }

    pub async fn run(&mut self) {
        tracing::info!("SupervisorBackground started");

        while let Some(command) = self.commands_rx.recv().await {
            tracing::trace!("Received command: {:?}", command);

            match command {
                SupervisorCommand::Up { services } => self.up(services).await,
                SupervisorCommand::Down => self.down().await,
                SupervisorCommand::ProcessExited {
                    service,
                    generation,
                    status,
                } => {
                    if self.is_current(&service, generation) {
                        self.on_exit(&service, status).await;
                        self.evaluate().await;
                    }
                }
                SupervisorCommand::HealthReport {
                    service,
                    generation,
                    status,
                    failures,
                } => {
                    if self.is_current(&service, generation) {
                        self.on_health(&service, status, failures).await;
                        self.evaluate().await;
                    }
                }
                SupervisorCommand::Restart {
                    service,
                    generation,
                } => {
                    if self.is_current(&service, generation) {
                        self.launch(&service, true).await;
                        self.evaluate().await;
                    }
                }
                SupervisorCommand::StallCheck { service } => {
                    let stuck = self
                        .table
                        .state(&service)
                        .is_some_and(|s| s.status == ServiceStatus::Pending && !s.stalled);
                    if stuck && self.selected.contains(&service) {
                        self.report_blocked(&service).await;
                    }
                }
                SupervisorCommand::Shutdown => {
                    self.down().await;
                    break;
                }
            }
        }

        tracing::info!("SupervisorBackground stopped");
    }

    fn is_current(&self, service: &str, generation: u64) -> bool {
        self.runtime
            .get(service)
            .is_some_and(|rt| rt.generation == generation)
    }

    async fn emit(&self, event: SupervisorEvent) {
        if self.output_tx.send(event).await.is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }

    /// Write a row of the status table and announce status transitions.
    async fn set(&self, name: &str, f: impl FnOnce(&mut ServiceState)) {
        let Some((old, new)) = self.table.update(name, f) else {
            return;
        };
        if old.status != new.status {
            tracing::info!(
                service = name,
                from = %old.status,
                to = %new.status,
                "Service status changed"
            );
            self.emit(SupervisorEvent::StatusChanged {
                service: name.to_owned(),
                from: old.status,
                to: new.status,
            })
            .await;
        }
    }

    #[tracing::instrument(skip(self), fields(project = %self.project.name))]
    async fn up(&mut self, services: Vec<String>) {
        let order = match start_order(&self.project, &services) {
            Ok(order) => order,
            Err(err) => {
                tracing::error!("Cannot start {services:?}: {err}");
                self.emit(SupervisorEvent::Error {
                    message: err.to_string(),
                })
                .await;
                return;
            }
        };
        tracing::info!("Starting services {order:?}");

        for name in &order {
            let live = self
                .runtime
                .get(name)
                .is_some_and(|rt| rt.proc_id.is_some());
            let Some(state) = self.table.state(name) else {
                continue;
            };
            if state.status == ServiceStatus::Stopped && !state.restart_pending && !live {
                self.set(name, |s| {
                    *s = ServiceState {
                        launches: s.launches,
                        restarts: s.restarts,
                        ..ServiceState::default()
                    };
                })
                .await;
            }
            self.selected.insert(name.clone());
        }

        self.evaluate().await;

        for name in order {
            if self.table.status(&name) == Some(ServiceStatus::Pending) {
                tracing::info!(service = %name, "Waiting for dependencies");
                self.schedule_stall_check(name);
            }
        }
    }

    /// Launch every selected pending service whose dependencies are met,
    /// until nothing changes. Runs after every status write.
    async fn evaluate(&mut self) {
        loop {
            let snapshot = self.table.snapshot();
            let ready: Vec<String> = self
                .order
                .iter()
                .filter(|name| self.selected.contains(*name))
                .filter(|name| {
                    snapshot
                        .get(*name)
                        .is_some_and(|s| s.status == ServiceStatus::Pending)
                })
                .filter(|name| {
                    self.project
                        .services
                        .get(*name)
                        .is_some_and(|service| gate::can_start(service, &snapshot))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                break;
            }
            for name in ready {
                self.launch(&name, false).await;
            }
        }

        let snapshot = self.table.snapshot();
        let mut doomed = Vec::new();
        for name in &self.order {
            let Some(state) = snapshot.get(name) else {
                continue;
            };
            if !self.selected.contains(name) || state.status != ServiceStatus::Pending || state.stalled
            {
                continue;
            }
            let Some(service) = self.project.services.get(name) else {
                continue;
            };
            if gate::blockers(&self.project, service, &snapshot)
                .iter()
                .any(|b| b.unsatisfiable)
            {
                doomed.push(name.clone());
            }
        }
        for name in doomed {
            self.report_blocked(&name).await;
        }
    }

    async fn report_blocked(&self, name: &str) {
        let Some(service) = self.project.services.get(name) else {
            return;
        };
        let blockers = gate::blockers(&self.project, service, &self.table.snapshot());
        let summary = blockers
            .iter()
            .map(|b| format!("{} ({}, wants {})", b.service, b.status, b.condition))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::warn!(service = name, blocked_on = %summary, "Service is blocked on its dependencies");

        self.set(name, |s| s.stalled = true).await;
        self.emit(SupervisorEvent::Blocked {
            service: name.to_owned(),
            blockers,
        })
        .await;
    }

    fn schedule_stall_check(&self, service: String) {
        let commands_tx = self.commands_tx.clone();
        let token = self.root.clone();
        let delay = self.project.settings.stall_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(delay) => {
                    let _ = commands_tx.send(SupervisorCommand::StallCheck { service }).await;
                }
            }
        });
    }

    async fn launch(&mut self, name: &str, restart: bool) {
        let Some(service) = self.project.services.get(name).cloned() else {
            return;
        };

        let cancel = self.root.child_token();
        let generation = {
            let rt = self.runtime.entry(name.to_owned()).or_default();
            rt.generation += 1;
            rt.proc_id = None;
            if let Some(old) = rt.cancel.replace(cancel.clone()) {
                old.cancel();
            }
            rt.generation
        };

        self.set(name, |s| {
            s.status = ServiceStatus::Starting;
            s.pid = None;
            s.launches += 1;
            s.failures = 0;
            s.restart_pending = false;
            s.stalled = false;
            if restart {
                s.restarts += 1;
            }
        })
        .await;

        let spec = command_spec(name, &service);
        tracing::debug!(service = name, cmd = ?spec.cmd, "Launching service");

        let process = match self.process_manager.spawn(spec.clone()).await {
            Ok(process) => process,
            Err(err) => {
                tracing::error!(service = name, "Failed to spawn: {err}");
                self.emit(SupervisorEvent::Error {
                    message: format!("failed to spawn `{name}`: {err}"),
                })
                .await;
                self.on_exit(name, SPAWN_FAILED).await;
                return;
            }
        };

        if let Some(rt) = self.runtime.get_mut(name) {
            rt.proc_id = Some(process.id);
        }
        let pid = process.pid;
        self.set(name, |s| s.pid = pid).await;

        self.forward_logs(name, process.stdout);
        self.forward_logs(name, process.stderr);

        {
            let commands_tx = self.commands_tx.clone();
            let token = cancel.clone();
            let service = name.to_owned();
            let mut exited = process.exited;
            tokio::spawn(async move {
                let status = tokio::select! {
                    () = token.cancelled() => None,
                    res = exited.wait_for(Option::is_some) => res.ok().and_then(|status| *status),
                };
                if let Some(status) = status {
                    let _ = commands_tx
                        .send(SupervisorCommand::ProcessExited {
                            service,
                            generation,
                            status,
                        })
                        .await;
                }
            });
        }

        match service.healthcheck {
            Some(check) => HealthProbeLoop {
                service: name.to_owned(),
                generation,
                check,
                spec,
                prober: Arc::clone(&self.prober),
                commands_tx: self.commands_tx.clone(),
                cancel,
                launched_at: Instant::now(),
            }
            .spawn(),
            None => {
                self.set(name, |s| s.status = ServiceStatus::Healthy).await;
            }
        }
    }

    fn forward_logs(&self, name: &str, mut stream: BoxStream<Vec<u8>>) {
        let output_tx = self.output_tx.clone();
        let service = name.to_owned();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let message = String::from_utf8_lossy(&chunk).into_owned();
                if output_tx
                    .send(SupervisorEvent::Log {
                        service: service.clone(),
                        message,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Record an exit and apply the restart policy. Dependents are not
    /// re-evaluated here.
    async fn on_exit(&mut self, name: &str, status: ExitStatus) {
        let Some(rt) = self.runtime.get_mut(name) else {
            return;
        };
        // Health reports already queued by the cancelled probe loop are stale.
        rt.generation += 1;
        let generation = rt.generation;
        if let Some(token) = rt.cancel.take() {
            token.cancel();
        }
        if let Some(id) = rt.proc_id.take() {
            self.process_manager.release(id).await;
        }
        let Some(policy) = self.project.services.get(name).map(|s| s.restart) else {
            return;
        };
        let restarts = self.table.state(name).map_or(0, |s| s.restarts);
        let failed = !status.success();
        let restart = policy.allows(failed, restarts);

        if failed {
            tracing::warn!(service = name, "Service exited with {status}");
        } else {
            tracing::info!(service = name, "Service exited with {status}");
        }

        self.set(name, |s| {
            s.status = ServiceStatus::Stopped;
            s.pid = None;
            s.failures = 0;
            s.last_exit = Some(status);
            s.restart_pending = restart;
        })
        .await;

        if !restart {
            return;
        }

        let delay = self.project.settings.restart_backoff.delay(restarts);
        tracing::info!(
            service = name,
            attempt = restarts + 1,
            "Restarting in {}",
            humantime::format_duration(delay)
        );
        self.emit(SupervisorEvent::Restarting {
            service: name.to_owned(),
            attempt: restarts + 1,
            delay,
        })
        .await;

        let commands_tx = self.commands_tx.clone();
        let token = self.root.clone();
        let service = name.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(delay) => {
                    let _ = commands_tx
                        .send(SupervisorCommand::Restart { service, generation })
                        .await;
                }
            }
        });
    }

    async fn on_health(&mut self, name: &str, status: Option<ServiceStatus>, failures: u32) {
        if status == Some(ServiceStatus::Unhealthy) {
            tracing::warn!(service = name, failures, "Service became unhealthy");
        }
        self.set(name, |s| {
            s.failures = failures;
            if let Some(status) = status {
                if s.status.is_running() {
                    s.status = status;
                }
            }
        })
        .await;
    }

    #[tracing::instrument(skip(self), fields(project = %self.project.name))]
    async fn down(&mut self) {
        tracing::info!("Stopping project");

        self.root.cancel();
        let order: Vec<String> = self.order.iter().rev().cloned().collect();
        for name in order {
            let proc_id = self.runtime.get_mut(&name).and_then(|rt| {
                rt.generation += 1;
                rt.cancel = None;
                rt.proc_id.take()
            });
            let Some(id) = proc_id else {
                self.set(&name, |s| s.restart_pending = false).await;
                continue;
            };

            let exit = self.stop_process(&name, id).await;
            self.process_manager.release(id).await;
            self.set(&name, |s| {
                s.status = ServiceStatus::Stopped;
                s.pid = None;
                s.restart_pending = false;
                if exit.is_some() {
                    s.last_exit = exit;
                }
            })
            .await;
        }

        self.selected.clear();
        self.root = CancellationToken::new();
        self.emit(SupervisorEvent::ProjectStopped).await;
    }

    /// Graceful stop, escalating to a kill after `kill_timeout`.
    async fn stop_process(&mut self, name: &str, id: ProcId) -> Option<ExitStatus> {
        let grace = self.project.settings.kill_timeout;

        if let Err(err) = self.process_manager.shutdown(id).await {
            tracing::warn!(service = name, "Failed to signal: {err}");
        }
        match self.process_manager.wait(id, grace).await {
            Ok(Some(status)) => return Some(status),
            Ok(None) => tracing::warn!(
                service = name,
                "Did not stop within {}, killing",
                humantime::format_duration(grace)
            ),
            Err(err) => tracing::warn!(service = name, "Failed to wait: {err}"),
        }

        if let Err(err) = self.process_manager.kill(id).await {
            tracing::error!(service = name, "Failed to kill: {err}");
        }
        self.process_manager.wait(id, grace).await.ok().flatten()
    }
}

fn command_spec(name: &str, service: &Service) -> CommandSpec {
    CommandSpec {
        name: name.to_owned(),
        cmd: service.cmd.clone(),
        cwd: service.cwd.clone(),
        env: service
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
