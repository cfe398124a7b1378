use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{Error, Result},
    CommandSpec, ExitStatus, ProcId, ProcessManager, Spawned,
};

#[derive(Debug, Default)]
struct MockInner {
    spawned: Vec<CommandSpec>,
    exits: Vec<watch::Sender<Option<ExitStatus>>>,
    fail_spawn: HashSet<String>,
    /// Services whose process was ended through `shutdown` or `kill`.
    stopped: Vec<String>,
    released: Vec<ProcId>,
}

/// Records spawned commands; tests decide when and how processes exit.
#[derive(Debug, Default, Clone)]
pub struct MockProcessManager {
    inner: Arc<Mutex<MockInner>>,
}

impl MockProcessManager {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap()
    }

    /// Names of spawned services, in spawn order.
    pub fn spawned(&self) -> Vec<String> {
        self.lock().spawned.iter().map(|s| s.name.clone()).collect()
    }

    pub fn spawn_count(&self, name: &str) -> usize {
        self.lock().spawned.iter().filter(|s| s.name == name).count()
    }

    pub fn last_spec(&self, name: &str) -> Option<CommandSpec> {
        self.lock()
            .spawned
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Make the latest process of `name` exit with `status`.
    pub fn exit(&self, name: &str, status: ExitStatus) {
        let inner = self.lock();
        let index = inner
            .spawned
            .iter()
            .rposition(|s| s.name == name)
            .unwrap();
        inner.exits[index].send_replace(Some(status));
    }

    /// Services stopped by the supervisor, in stop order.
    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    /// Processes of `name` the supervisor released, counted once each.
    pub fn released(&self, name: &str) -> usize {
        let inner = self.lock();
        inner
            .released
            .iter()
            .filter(|id| {
                inner
                    .spawned
                    .get(id.0 as usize)
                    .is_some_and(|spec| spec.name == name)
            })
            .count()
    }

    pub fn fail_spawn(&self, name: &str) {
        self.lock().fail_spawn.insert(name.to_owned());
    }

    fn finish(&self, id: ProcId, status: ExitStatus) -> Result<()> {
        let mut inner = self.lock();
        let index = id.0 as usize;
        let sender = inner.exits.get(index).ok_or(Error::UnknownProcess(id))?;
        if sender.borrow().is_some() {
            return Ok(());
        }
        sender.send_replace(Some(status));
        let name = inner.spawned[index].name.clone();
        inner.stopped.push(name);
        Ok(())
    }
}

#[async_trait]
impl ProcessManager for MockProcessManager {
    async fn spawn(&mut self, spec: CommandSpec) -> Result<Spawned> {
        let mut inner = self.lock();
        if inner.fail_spawn.contains(&spec.name) {
            return Err(Error::IOError(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )));
        }

        let id = ProcId(inner.spawned.len() as u64);
        let (exit_tx, exited) = watch::channel(None);
        inner.spawned.push(spec);
        inner.exits.push(exit_tx);

        let (_, stdout) = mpsc::channel(1);
        let (_, stderr) = mpsc::channel(1);
        Ok(Spawned {
            id,
            pid: Some(1000 + id.0 as u32),
            stdout: Box::pin(ReceiverStream::new(stdout)),
            stderr: Box::pin(ReceiverStream::new(stderr)),
            exited,
        })
    }

    async fn shutdown(&mut self, id: ProcId) -> Result<()> {
        self.finish(id, ExitStatus::Signal(libc::SIGTERM))
    }

    async fn wait(&mut self, id: ProcId, _d: Duration) -> Result<Option<ExitStatus>> {
        let inner = self.lock();
        let sender = inner
            .exits
            .get(id.0 as usize)
            .ok_or(Error::UnknownProcess(id))?;
        let status = *sender.borrow();
        Ok(status)
    }

    async fn kill(&mut self, id: ProcId) -> Result<()> {
        self.finish(id, ExitStatus::Signal(libc::SIGKILL))
    }

    async fn release(&mut self, id: ProcId) {
        self.lock().released.push(id);
    }
}
