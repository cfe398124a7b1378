use std::sync::Arc;

use muster_types::Project;
use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    health::HealthProbe,
    process_manager::ProcessManager,
    status::StatusTable,
    supervisor::{
        background::SupervisorBackground,
        commands::{SupervisorCommand, SupervisorEvent},
    },
    topology::start_order,
};

/// Handle to the supervisor task of one project.
///
/// Dropping the handle aborts the task; the process manager then kills
/// whatever is still running.
#[derive(Debug)]
pub struct Supervisor {
    task: tokio::task::JoinHandle<()>,
    commands_tx: mpsc::Sender<SupervisorCommand>,
    table: StatusTable,
}

impl Supervisor {
    /// Spawn the supervisor task for `project`. Nothing is launched until
    /// [`Supervisor::up`] is called.
    ///
    /// # Errors
    /// Returns an error if the dependency graph has a cycle or an unknown
    /// service.
    pub fn new<P: ProcessManager + 'static>(
        project: Project,
        process_manager: P,
        prober: Arc<dyn HealthProbe>,
    ) -> Result<(Self, mpsc::Receiver<SupervisorEvent>)> {
        let order = start_order(&project, &[])?;
        let table = StatusTable::for_project(&project);

        let (commands_tx, commands_rx) = mpsc::channel::<SupervisorCommand>(100);
        let (mut inner, output_rx) = SupervisorBackground::new(
            project,
            order,
            process_manager,
            prober,
            table.clone(),
            commands_tx.clone(),
            commands_rx,
        );

        let task = tokio::spawn(async move {
            inner.run().await;
        });

        Ok((
            Self {
                task,
                commands_tx,
                table,
            },
            output_rx,
        ))
    }

    /// Live status table of the project.
    #[must_use]
    pub fn status(&self) -> &StatusTable {
        &self.table
    }

    /// Start `services` and their dependencies. An empty list starts every
    /// service of the project.
    ///
    /// # Errors
    /// Returns an error if the supervisor task is gone.
    pub async fn up(&self, services: Vec<String>) -> Result<()> {
        tracing::trace!("Received up command for services {services:?}");

        self.send(SupervisorCommand::Up { services }).await
    }

    /// Stop every running service in reverse dependency order.
    /// [`SupervisorEvent::ProjectStopped`] is emitted once done.
    ///
    /// # Errors
    /// Returns an error if the supervisor task is gone.
    pub async fn down(&self) -> Result<()> {
        self.send(SupervisorCommand::Down).await
    }

    /// Stop everything and terminate the supervisor task.
    ///
    /// # Errors
    /// Returns an error if the supervisor task is gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SupervisorCommand::Shutdown).await
    }

    async fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
