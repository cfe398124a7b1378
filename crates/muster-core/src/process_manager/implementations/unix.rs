use std::{collections::HashMap, time::Duration};

use futures::StreamExt;
use libc::{killpg, setsid, ESRCH, SIGKILL, SIGTERM};
use tokio::{io::BufReader, process::Command, sync::watch, time::timeout};
use tokio_util::io::ReaderStream;

use crate::{
    error::{Error, Result},
    process_manager::{
        base::ProcessManager,
        types::{CommandSpec, ExitStatus, ExitWatch, ProcId, Spawned},
    },
};

#[derive(Debug)]
struct ChildRec {
    pgid: libc::pid_t,
    exited: ExitWatch,
}

/// Unix-specific process manager.
///
/// Every child becomes the leader of its own session, so signals reach the
/// whole process group a service spawns. Children do not see the terminal's
/// SIGINT; groups still running when the manager is dropped are killed.
#[derive(Debug, Default)]
pub struct UnixProcessManager {
    processes: HashMap<ProcId, ChildRec>,
    next_id: u64,
}

impl UnixProcessManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: ProcId) -> Result<&ChildRec> {
        self.processes.get(&id).ok_or(Error::UnknownProcess(id))
    }

    fn signal(&self, id: ProcId, signal: libc::c_int) -> Result<()> {
        let proc = self.record(id)?;
        if proc.exited.borrow().is_some() {
            return Ok(());
        }
        signal_group(proc.pgid, signal)
    }
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> Result<()> {
    #[allow(unsafe_code)]
    let rc = unsafe { killpg(pgid, signal) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ESRCH) {
            return Ok(());
        }
        return Err(Error::IOError(err));
    }
    Ok(())
}

impl Drop for UnixProcessManager {
    fn drop(&mut self) {
        for proc in self.processes.values() {
            if proc.exited.borrow().is_some() {
                continue;
            }
            tracing::warn!("Killing process group {} left running", proc.pgid);
            if let Err(err) = signal_group(proc.pgid, SIGKILL) {
                tracing::error!("Failed to kill process group {}: {err}", proc.pgid);
            }
        }
    }
}

#[async_trait::async_trait]
impl ProcessManager for UnixProcessManager {
    async fn spawn(&mut self, spec: CommandSpec) -> Result<Spawned> {
        let Some((program, args)) = spec.cmd.split_first() else {
            return Err(Error::Internal(format!(
                "empty cmd for service `{}`",
                spec.name
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(|| {
                if setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;

        let pid = child.id();
        let pgid = pid
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            .ok_or_else(|| Error::IOError(std::io::Error::other("pid not available")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::IOError(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::IOError(std::io::Error::other("stderr not piped")))?;

        let out_stream = ReaderStream::new(BufReader::new(stdout))
            .filter_map(|res| async move { res.ok().map(|b| b.to_vec()) });
        let err_stream = ReaderStream::new(BufReader::new(stderr))
            .filter_map(|res| async move { res.ok().map(|b| b.to_vec()) });

        let (exit_tx, exited) = watch::channel(None);
        let name = spec.name.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => ExitStatus::from(status),
                Err(err) => {
                    tracing::error!("Failed to wait for `{name}`: {err}");
                    ExitStatus::Code(-1)
                }
            };
            tracing::debug!("Process `{name}` exited with {status}");
            let _ = exit_tx.send(Some(status));
        });

        let id = ProcId(self.next_id);
        self.next_id += 1;
        self.processes.insert(
            id,
            ChildRec {
                pgid,
                exited: exited.clone(),
            },
        );

        Ok(Spawned {
            id,
            pid,
            stdout: Box::pin(out_stream),
            stderr: Box::pin(err_stream),
            exited,
        })
    }

    async fn shutdown(&mut self, id: ProcId) -> Result<()> {
        self.signal(id, SIGTERM)
    }

    async fn wait(&mut self, id: ProcId, d: Duration) -> Result<Option<ExitStatus>> {
        let mut exited = self.record(id)?.exited.clone();

        let result = timeout(d, exited.wait_for(Option::is_some)).await;
        match result {
            Ok(Ok(status)) => Ok(*status),
            Ok(Err(_)) => Err(Error::Internal(format!(
                "exit watcher for process {id:?} is gone"
            ))),
            Err(_) => Ok(None),
        }
    }

    async fn kill(&mut self, id: ProcId) -> Result<()> {
        self.signal(id, SIGKILL)
    }

    async fn release(&mut self, id: ProcId) {
        if self
            .processes
            .get(&id)
            .is_some_and(|proc| proc.exited.borrow().is_some())
        {
            self.processes.remove(&id);
        }
    }
}
