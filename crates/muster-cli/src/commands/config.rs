use std::{fmt::Write as _, path::PathBuf};

use anyhow::Result;
use colored::Colorize;
use muster_core::start_order;
use muster_types::{Project, Restart};
use serde_json::Value;

use crate::commands::load_project;

pub fn config(file: Option<PathBuf>, env_file: Option<PathBuf>, json: bool) -> Result<()> {
    let project = load_project(file, env_file)?;
    let order = start_order(&project, &[])?;

    if json {
        println!("{}", serde_json::to_string_pretty(&json_view(&project, &order)?)?);
    } else {
        print!("{}", render(&project, &order));
    }
    Ok(())
}

/// Machine readable summary. Like [`render`], each service's `env` lists only
/// the variable names.
fn json_view(project: &Project, order: &[String]) -> Result<Value> {
    let mut project = serde_json::to_value(project)?;
    if let Some(services) = project.get_mut("services").and_then(Value::as_object_mut) {
        for service in services.values_mut() {
            if let Some(env) = service.get_mut("env") {
                let keys: Vec<Value> = env
                    .as_object()
                    .map(|vars| vars.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                *env = Value::Array(keys);
            }
        }
    }

    Ok(serde_json::json!({
        "start_order": order,
        "project": project,
    }))
}

/// Human readable summary. Environment values are left out since they often
/// carry generated secrets.
fn render(project: &Project, order: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "project".bold(), project.name);
    let _ = writeln!(out, "{} {}", "root".bold(), project.root.display());
    let _ = writeln!(out, "{} {}", "start order".bold(), order.join(" -> "));

    for name in order {
        let Some(service) = project.services.get(name) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", name.bold());
        let _ = writeln!(out, "  cmd: {}", service.cmd.join(" "));
        if let Some(cwd) = &service.cwd {
            let _ = writeln!(out, "  cwd: {}", cwd.display());
        }
        if !service.env.is_empty() {
            let keys: Vec<&str> = service.env.keys().map(String::as_str).collect();
            let _ = writeln!(out, "  env: {}", keys.join(", "));
        }
        for dep in &service.deps {
            let _ = writeln!(out, "  depends on: {} ({})", dep.service, dep.condition);
        }
        if let Some(check) = &service.healthcheck {
            let _ = writeln!(
                out,
                "  healthcheck: {} every {}, timeout {}, retries {}, start period {}",
                check.probe,
                humantime::format_duration(check.interval),
                humantime::format_duration(check.timeout),
                check.retries,
                humantime::format_duration(check.start_period),
            );
        }
        if service.restart != Restart::Never {
            let _ = writeln!(out, "  restart: {}", service.restart);
        }
    }
    out
}
