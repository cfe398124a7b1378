use std::{fmt::Write as _, path::PathBuf};

use anyhow::Result;
use muster_core::{ServiceReport, StatusReport};

use crate::{commands::DEFAULT_STATE_DIR, state::StateDir};

const HEADERS: [&str; 8] = [
    "SERVICE",
    "STATUS",
    "PID",
    "LAUNCHES",
    "RESTARTS",
    "FAILURES",
    "LAST EXIT",
    "BLOCKED ON",
];

pub fn status(state_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let state = StateDir::new(state_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)));
    let report = state.read_report()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn row(service: &ServiceReport) -> [String; 8] {
    let blocked_on = service
        .blocked_on
        .iter()
        .map(|b| {
            let mark = if b.unsatisfiable { "!" } else { "" };
            format!("{}{mark} ({})", b.service, b.status)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let status = if service.stalled {
        format!("{} (stalled)", service.status)
    } else {
        service.status.to_string()
    };

    [
        service.name.clone(),
        status,
        service.pid.map(|p| p.to_string()).unwrap_or_default(),
        service.launches.to_string(),
        service.restarts.to_string(),
        service.failures.to_string(),
        service.last_exit.map(|e| e.to_string()).unwrap_or_default(),
        blocked_on,
    ]
}

fn render(report: &StatusReport) -> String {
    let rows: Vec<[String; 8]> = report.services.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} (as of {})", report.project, report.generated_at);
    let mut line = |cells: &[&str]| {
        let text = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", text.trim_end());
    };

    line(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&cells);
    }
    out
}
