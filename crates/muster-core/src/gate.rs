//! Dependency gate: pure queries over the status table deciding whether a
//! pending service may be launched.

use muster_types::{Condition, Project, Service};
use serde::{Deserialize, Serialize};

use crate::{status::StatusSnapshot, ServiceState, ServiceStatus};

/// An unmet dependency of a pending service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub service: String,
    pub condition: Condition,
    pub status: ServiceStatus,
    /// The dependency can no longer reach `condition` in this run.
    pub unsatisfiable: bool,
}

#[must_use]
pub fn condition_met(condition: Condition, state: &ServiceState) -> bool {
    match condition {
        Condition::Started => state.status.has_started(),
        Condition::Healthy => state.status == ServiceStatus::Healthy,
        Condition::CompletedSuccessfully => {
            state.status == ServiceStatus::Stopped
                && !state.restart_pending
                && state.last_exit.is_some_and(|exit| exit.success())
        }
    }
}

/// True iff every declared dependency currently meets its condition.
#[must_use]
pub fn can_start(service: &Service, table: &StatusSnapshot) -> bool {
    service.deps.iter().all(|dep| {
        table
            .get(&dep.service)
            .is_some_and(|state| condition_met(dep.condition, state))
    })
}

/// Unmet dependencies of `service`, in declaration order.
#[must_use]
pub fn blockers(project: &Project, service: &Service, table: &StatusSnapshot) -> Vec<Blocker> {
    service
        .deps
        .iter()
        .filter_map(|dep| {
            let state = table.get(&dep.service).cloned().unwrap_or_default();
            if condition_met(dep.condition, &state) {
                return None;
            }
            Some(Blocker {
                service: dep.service.clone(),
                condition: dep.condition,
                status: state.status,
                unsatisfiable: is_unsatisfiable(project, &dep.service, dep.condition, table),
            })
        })
        .collect()
}

/// A dependency that stopped for good, or that is itself stuck behind such a
/// dependency, will never meet `condition`.
#[must_use]
pub fn is_unsatisfiable(
    project: &Project,
    dependency: &str,
    condition: Condition,
    table: &StatusSnapshot,
) -> bool {
    unsatisfiable_at(project, dependency, condition, table, 0)
}

fn unsatisfiable_at(
    project: &Project,
    name: &str,
    condition: Condition,
    table: &StatusSnapshot,
    depth: usize,
) -> bool {
    if depth > project.services.len() {
        return false;
    }
    let Some(state) = table.get(name) else {
        return false;
    };

    match state.status {
        ServiceStatus::Stopped if !state.restart_pending => !condition_met(condition, state),
        ServiceStatus::Pending => project.services.get(name).is_some_and(|service| {
            service.deps.iter().any(|dep| {
                table
                    .get(&dep.service)
                    .is_some_and(|s| !condition_met(dep.condition, s))
                    && unsatisfiable_at(project, &dep.service, dep.condition, table, depth + 1)
            })
        }),
        _ => false,
    }
}
