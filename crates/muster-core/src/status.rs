use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use muster_types::Project;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    gate::{self, Blocker},
    ExitStatus, ServiceState, ServiceStatus,
};

pub type StatusSnapshot = BTreeMap<String, ServiceState>;

/// Shared status table.
///
/// The supervisor is the only writer. Readers take snapshots or subscribe to
/// changes.
#[derive(Debug, Clone)]
pub struct StatusTable {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl StatusTable {
    /// A table with every service of `project` in `pending`.
    #[must_use]
    pub fn for_project(project: &Project) -> Self {
        Self::new(project.services.keys().cloned())
    }

    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let snapshot = names
            .into_iter()
            .map(|name| (name, ServiceState::default()))
            .collect();
        let (tx, _) = watch::channel(snapshot);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.tx.borrow().get(name).map(|state| state.status)
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.tx.borrow().get(name).cloned()
    }

    /// Apply `f` to the row of `name`. Subscribers are only notified when the
    /// row actually changed; the old and new rows are returned in that case.
    pub(crate) fn update(
        &self,
        name: &str,
        f: impl FnOnce(&mut ServiceState),
    ) -> Option<(ServiceState, ServiceState)> {
        let mut change = None;
        self.tx.send_if_modified(|table| {
            let Some(state) = table.get_mut(name) else {
                return false;
            };
            let old = state.clone();
            f(state);
            if *state == old {
                return false;
            }
            change = Some((old, state.clone()));
            true
        });
        change
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn report(&self, project: &Project) -> StatusReport {
        StatusReport::new(project, &self.snapshot())
    }
}

/// Serializable view of the status table, written for out-of-process readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub project: String,
    pub generated_at: String,
    pub services: Vec<ServiceReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub launches: u32,
    pub restarts: u32,
    pub failures: u32,
    pub last_exit: Option<ExitStatus>,
    pub stalled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_on: Vec<Blocker>,
}

impl StatusReport {
    #[must_use]
    pub fn new(project: &Project, snapshot: &StatusSnapshot) -> Self {
        let services = snapshot
            .iter()
            .map(|(name, state)| {
                let blocked_on = match project.services.get(name) {
                    Some(service) if state.status == ServiceStatus::Pending => {
                        gate::blockers(project, service, snapshot)
                    }
                    _ => Vec::new(),
                };
                ServiceReport {
                    name: name.clone(),
                    status: state.status,
                    pid: state.pid,
                    launches: state.launches,
                    restarts: state.restarts,
                    failures: state.failures,
                    last_exit: state.last_exit,
                    stalled: state.stalled,
                    blocked_on,
                }
            })
            .collect();

        Self {
            project: project.name.clone(),
            generated_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_notifies_only_on_change() {
        let table = StatusTable::new(["db".to_owned()]);
        let mut rx = table.subscribe();
        rx.mark_unchanged();

        assert!(table.update("db", |_| {}).is_none());
        assert!(!rx.has_changed().unwrap());

        let (old, new) = table
            .update("db", |s| s.status = ServiceStatus::Starting)
            .unwrap();
        assert_eq!(old.status, ServiceStatus::Pending);
        assert_eq!(new.status, ServiceStatus::Starting);
        assert!(rx.has_changed().unwrap());

        assert!(table.update("missing", |s| s.launches = 1).is_none());
        assert_eq!(table.status("db"), Some(ServiceStatus::Starting));
    }
}
