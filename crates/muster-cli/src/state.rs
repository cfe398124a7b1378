use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use muster_core::StatusReport;

pub const STATUS_FILE: &str = "status.json";

/// Location of the status report written by `muster up`.
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))
    }

    /// Replace the report atomically, so readers never see a partial file.
    pub fn write_report(&self, report: &StatusReport) -> Result<()> {
        let path = self.status_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(report)?;

        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("failed to replace {}", path.display()))
    }

    pub fn read_report(&self) -> Result<StatusReport> {
        read_report(&self.status_path())
    }
}

fn read_report(path: &Path) -> Result<StatusReport> {
    let text = fs::read_to_string(path).with_context(|| {
        format!(
            "no status report at {}, is `muster up` running here?",
            path.display()
        )
    })?;
    serde_json::from_str(&text).with_context(|| format!("malformed status report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use muster_core::{ServiceReport, ServiceStatus};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_write_then_read_report() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path().join(".muster"));
        state.prepare().unwrap();

        let report = StatusReport {
            project: "airweave".to_owned(),
            generated_at: "2026-10-16T12:00:00Z".to_owned(),
            services: vec![ServiceReport {
                name: "db".to_owned(),
                status: ServiceStatus::Healthy,
                pid: Some(4242),
                launches: 1,
                restarts: 0,
                failures: 0,
                last_exit: None,
                stalled: false,
                blocked_on: vec![],
            }],
        };
        state.write_report(&report).unwrap();

        assert_eq!(state.read_report().unwrap(), report);
        assert!(!state.status_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_report_mentions_path() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path().to_path_buf());

        let err = state.read_report().unwrap_err();
        assert!(format!("{err:#}").contains("status.json"));
    }
}
