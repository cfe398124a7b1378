use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use muster_core::{StatusReport, Supervisor, SupervisorEvent, SystemProbe, UnixProcessManager};
use tokio::signal;

use crate::{
    commands::{load_project, DEFAULT_STATE_DIR},
    logger::Logger,
    state::StateDir,
};

pub async fn up(
    file: Option<PathBuf>,
    env_file: Option<PathBuf>,
    kill_timeout: Option<u64>,
    state_dir: Option<PathBuf>,
    services: Vec<String>,
) -> Result<()> {
    let mut project = load_project(file, env_file)?;
    if let Some(secs) = kill_timeout {
        project.settings.kill_timeout = Duration::from_secs(secs);
    }
    for name in &services {
        if !project.services.contains_key(name) {
            bail!("service `{name}` not found in project `{}`", project.name);
        }
    }

    let state = StateDir::new(state_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)));
    state.prepare()?;

    let prober = Arc::new(SystemProbe::new()?);
    let (supervisor, mut events) =
        Supervisor::new(project.clone(), UnixProcessManager::new(), prober)?;
    let mut statuses = supervisor.status().subscribe();
    state.write_report(&supervisor.status().report(&project))?;

    supervisor.up(services).await?;

    let mut shutting_down = false;
    let mut logger = Logger::stdout();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if shutting_down {
                    tracing::warn!("Second Ctrl+C: killing remaining services");
                    return Ok(());
                }

                shutting_down = true;
                logger.system("Stopping services, press Ctrl+C again to kill them");
                supervisor.down().await?;
            }

            changed = statuses.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let report = StatusReport::new(&project, &statuses.borrow_and_update());
                if let Err(err) = state.write_report(&report) {
                    tracing::warn!("Failed to write status report: {err:#}");
                }
            }

            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    tracing::info!("Event stream ended");
                    return Ok(());
                };
                match event {
                    SupervisorEvent::Log { service, message } => logger.log(&service, &message),
                    SupervisorEvent::StatusChanged { service, from, to } => {
                        logger.status(&service, from, to);
                    }
                    SupervisorEvent::Blocked { service, blockers } => {
                        logger.blocked(&service, &blockers);
                    }
                    SupervisorEvent::Restarting { service, attempt, delay } => {
                        logger.system(&format!(
                            "{service}: restart #{attempt} in {}",
                            humantime::format_duration(delay)
                        ));
                    }
                    SupervisorEvent::Error { message } => logger.error(&message),
                    SupervisorEvent::ProjectStopped => {
                        state.write_report(&supervisor.status().report(&project))?;
                        logger.system("All services stopped");
                        supervisor.shutdown().await?;
                        return Ok(());
                    }
                }
            }
        }
    }
}
