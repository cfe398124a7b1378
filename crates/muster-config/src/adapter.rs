use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use muster_types::{
    Backoff, Condition, Dependency, HealthCheck, Probe, Project, Restart, Service, Settings,
    DEFAULT_ON_FAILURE_RETRIES,
};

use crate::{
    env::{Environment, Variables},
    interpolate::interpolate,
    raw::{RawCondition, RawDependsOn, RawHealthCheck, RawProject, RawService, RawSettings},
    ConfigError,
};

pub const SUPPORTED_VERSION: u32 = 1;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRIES: u32 = 3;

impl RawProject {
    pub fn to_project(&self, path: &Path, env: &Environment) -> Result<Project, ConfigError> {
        if self.version != SUPPORTED_VERSION {
            return Err(ConfigError::Validation(format!(
                "unsupported config version {} (expected {SUPPORTED_VERSION})",
                self.version
            )));
        }

        let vars = env.resolve(&self.variables)?;
        let root = project_root(path);

        let name = match &self.name {
            Some(name) => subst(&vars, name)?,
            None => root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("muster")
                .to_owned(),
        };

        let services = self
            .services
            .iter()
            .map(|(name, raw_service)| {
                let service = to_service(name, raw_service, &vars, &root)?;
                Ok((name.clone(), service))
            })
            .collect::<Result<BTreeMap<String, Service>, ConfigError>>()?;

        validate_dependencies(&services)?;

        Ok(Project {
            version: self.version,
            name,
            root,
            settings: to_settings(&self.settings, &vars)?,
            services,
        })
    }
}

fn project_root(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn subst(vars: &Variables<'_>, input: &str) -> Result<String, ConfigError> {
    interpolate(input, &|name: &str| vars.get(name))
}

fn duration(
    vars: &Variables<'_>,
    field: &str,
    raw: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let text = subst(vars, raw)?;
    humantime::parse_duration(text.trim())
        .map_err(|err| ConfigError::Validation(format!("{field}: invalid duration {text:?}: {err}")))
}

fn to_settings(raw: &RawSettings, vars: &Variables<'_>) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();
    let backoff = match &raw.restart_backoff {
        Some(raw_backoff) => Backoff {
            base: duration(
                vars,
                "settings.restart_backoff.base",
                raw_backoff.base.as_ref(),
                defaults.restart_backoff.base,
            )?,
            max: duration(
                vars,
                "settings.restart_backoff.max",
                raw_backoff.max.as_ref(),
                defaults.restart_backoff.max,
            )?,
        },
        None => defaults.restart_backoff,
    };
    if backoff.base > backoff.max {
        return Err(ConfigError::Validation(
            "settings.restart_backoff: base is larger than max".into(),
        ));
    }

    Ok(Settings {
        stall_timeout: duration(
            vars,
            "settings.stall_timeout",
            raw.stall_timeout.as_ref(),
            defaults.stall_timeout,
        )?,
        kill_timeout: duration(
            vars,
            "settings.kill_timeout",
            raw.kill_timeout.as_ref(),
            defaults.kill_timeout,
        )?,
        restart_backoff: backoff,
    })
}

fn to_service(
    name: &str,
    raw_service: &RawService,
    vars: &Variables<'_>,
    root: &Path,
) -> Result<Service, ConfigError> {
    let cmd = to_argv(vars, &format!("service `{name}`: cmd"), &raw_service.cmd)?;

    let cwd = raw_service
        .cwd
        .as_ref()
        .map(|cwd| subst(vars, cwd).map(|cwd| root.join(cwd)))
        .transpose()?;

    let mut env = vars.exported.clone();
    for (key, value) in raw_service.env.clone().unwrap_or_default() {
        env.insert(key, subst(vars, &value.into_string())?);
    }

    let deps = to_dependencies(name, raw_service)?;

    let healthcheck = raw_service
        .healthcheck
        .as_ref()
        .map(|raw| to_healthcheck(name, raw, vars))
        .transpose()?;

    let restart = match &raw_service.restart {
        Some(policy) => parse_restart(&subst(vars, policy)?)
            .map_err(|err| ConfigError::Validation(format!("service `{name}`: {err}")))?,
        None => Restart::default(),
    };

    Ok(Service {
        cmd,
        cwd,
        env,
        deps,
        healthcheck,
        restart,
    })
}

fn to_argv(vars: &Variables<'_>, field: &str, raw: &[String]) -> Result<Vec<String>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::Validation(format!("{field} is empty")));
    }
    let argv = raw
        .iter()
        .map(|arg| subst(vars, arg))
        .collect::<Result<Vec<_>, _>>()?;
    if argv.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "{field} contains empty element"
        )));
    }
    Ok(argv)
}

fn to_dependencies(name: &str, raw_service: &RawService) -> Result<Vec<Dependency>, ConfigError> {
    let mut deps: Vec<Dependency> = raw_service
        .deps
        .iter()
        .flatten()
        .map(|service| Dependency {
            service: service.clone(),
            condition: Condition::Started,
        })
        .collect();

    match &raw_service.depends_on {
        Some(RawDependsOn::List(list)) => deps.extend(list.iter().map(|service| Dependency {
            service: service.clone(),
            condition: Condition::Started,
        })),
        Some(RawDependsOn::Map(map)) => deps.extend(map.iter().map(|(service, condition)| {
            Dependency {
                service: service.clone(),
                condition: match condition {
                    RawCondition::Started => Condition::Started,
                    RawCondition::Healthy => Condition::Healthy,
                    RawCondition::CompletedSuccessfully => Condition::CompletedSuccessfully,
                },
            }
        })),
        None => {}
    }

    let mut seen = HashSet::new();
    for dep in &deps {
        if dep.service == name {
            return Err(ConfigError::Validation(format!(
                "service `{name}`: depends on itself"
            )));
        }
        if !seen.insert(dep.service.as_str()) {
            return Err(ConfigError::Validation(format!(
                "service `{name}`: dependency `{}` declared twice",
                dep.service
            )));
        }
    }

    Ok(deps)
}

fn to_healthcheck(
    name: &str,
    raw: &RawHealthCheck,
    vars: &Variables<'_>,
) -> Result<HealthCheck, ConfigError> {
    let field = format!("service `{name}`: healthcheck");

    let mut probes = Vec::with_capacity(1);
    if let Some(cmd) = &raw.cmd {
        probes.push(Probe::Cmd(to_argv(vars, &format!("{field}.cmd"), cmd)?));
    }
    if let Some(shell) = &raw.shell {
        probes.push(Probe::Shell(subst(vars, shell)?));
    }
    if let Some(url) = &raw.http {
        let url = subst(vars, url)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "{field}.http: expected an http(s) URL, got {url:?}"
            )));
        }
        probes.push(Probe::Http(url));
    }
    if let Some(addr) = &raw.tcp {
        let addr = subst(vars, addr)?;
        let (host, port) = addr
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| {
                ConfigError::Validation(format!("{field}.tcp: expected host:port, got {addr:?}"))
            })?;
        probes.push(Probe::Tcp {
            host: host.to_owned(),
            port,
        });
    }

    if probes.len() != 1 {
        return Err(ConfigError::Validation(format!(
            "{field}: exactly one of cmd, shell, http, tcp must be set"
        )));
    }
    let probe = probes.remove(0);

    let interval = duration(
        vars,
        &format!("{field}.interval"),
        raw.interval.as_ref(),
        DEFAULT_INTERVAL,
    )?;
    let timeout = duration(
        vars,
        &format!("{field}.timeout"),
        raw.timeout.as_ref(),
        DEFAULT_TIMEOUT,
    )?;
    let start_period = duration(
        vars,
        &format!("{field}.start_period"),
        raw.start_period.as_ref(),
        Duration::ZERO,
    )?;
    let retries = raw.retries.unwrap_or(DEFAULT_RETRIES);

    if interval.is_zero() || timeout.is_zero() {
        return Err(ConfigError::Validation(format!(
            "{field}: interval and timeout must be positive"
        )));
    }
    if retries == 0 {
        return Err(ConfigError::Validation(format!(
            "{field}: retries must be at least 1"
        )));
    }

    Ok(HealthCheck {
        probe,
        interval,
        timeout,
        retries,
        start_period,
    })
}

fn parse_restart(policy: &str) -> Result<Restart, String> {
    let (kind, max) = match policy.split_once(':') {
        Some((kind, max)) => {
            let max = max
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid restart retry count in {policy:?}"))?;
            (kind.trim(), Some(max))
        }
        None => (policy.trim(), None),
    };

    match (kind, max) {
        ("no" | "never", None) => Ok(Restart::Never),
        ("on-failure", max) => Ok(Restart::OnFailure {
            max_retries: max.unwrap_or(DEFAULT_ON_FAILURE_RETRIES),
        }),
        ("always" | "unless-stopped", max) => Ok(Restart::Always { max_retries: max }),
        _ => Err(format!("unknown restart policy {policy:?}")),
    }
}

/// Every dependency must exist and the graph must be acyclic.
fn validate_dependencies(services: &BTreeMap<String, Service>) -> Result<(), ConfigError> {
    for (name, service) in services {
        for dep in service.dependency_names() {
            if !services.contains_key(dep) {
                return Err(ConfigError::Validation(format!(
                    "service `{name}`: unknown dependency `{dep}`"
                )));
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        services: &'a BTreeMap<String, Service>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(name);
                return Err(ConfigError::Validation(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);
        if let Some(service) = services.get(name) {
            for dep in service.dependency_names() {
                visit(dep, services, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for name in services.keys() {
        visit(name, services, &mut marks, &mut Vec::new())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use crate::raw::{RawScalar, RawVariable};

    use super::*;

    fn service(cmd: &[&str]) -> RawService {
        RawService {
            cmd: cmd.iter().map(|s| (*s).to_owned()).collect(),
            ..RawService::default()
        }
    }

    fn project(services: Vec<(&str, RawService)>) -> RawProject {
        RawProject {
            version: 1,
            name: Some("test".to_owned()),
            settings: RawSettings::default(),
            variables: BTreeMap::new(),
            services: services
                .into_iter()
                .map(|(name, s)| (name.to_owned(), s))
                .collect(),
        }
    }

    #[test]
    fn test_raw_to_project_success() {
        let mut raw = project(vec![
            (
                "full_service",
                RawService {
                    cmd: vec!["echo".to_owned(), "${GREETING}".to_owned()],
                    cwd: Some("app".to_owned()),
                    env: Some(BTreeMap::from([(
                        "KEY".to_owned(),
                        RawScalar::String("Value".to_owned()),
                    )])),
                    deps: Some(vec!["empty_service".to_owned()]),
                    healthcheck: None,
                    restart: Some("always".to_owned()),
                    depends_on: None,
                },
            ),
            ("empty_service", service(&["echo", "hello"])),
        ]);
        raw.variables.insert(
            "GREETING".to_owned(),
            RawVariable::Value(RawScalar::String("hello".to_owned())),
        );

        let expected = {
            let mut services = BTreeMap::new();
            services.insert(
                "full_service".into(),
                Service {
                    cmd: vec!["echo".to_owned(), "hello".to_owned()],
                    cwd: Some(PathBuf::from("/srv/app")),
                    env: BTreeMap::from([
                        ("GREETING".to_owned(), "hello".to_owned()),
                        ("KEY".to_owned(), "Value".to_owned()),
                    ]),
                    deps: vec![Dependency {
                        service: "empty_service".to_owned(),
                        condition: Condition::Started,
                    }],
                    healthcheck: None,
                    restart: Restart::Always { max_retries: None },
                },
            );
            services.insert(
                "empty_service".into(),
                Service {
                    cmd: vec!["echo".to_owned(), "hello".to_owned()],
                    cwd: None,
                    env: BTreeMap::from([("GREETING".to_owned(), "hello".to_owned())]),
                    deps: vec![],
                    healthcheck: None,
                    restart: Restart::Never,
                },
            );
            Project {
                version: 1,
                name: "test".to_owned(),
                root: PathBuf::from("/srv"),
                settings: Settings::default(),
                services,
            }
        };

        let actual = raw
            .to_project(&PathBuf::from("/srv/muster.toml"), &Environment::default())
            .unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_empty_cmd() {
        let env = Environment::default();
        let path = PathBuf::from("muster.toml");

        let raw = project(vec![("test", service(&[]))]);
        assert!(raw.to_project(&path, &env).is_err());

        let raw = project(vec![("test", service(&["echo", ""]))]);
        assert!(raw.to_project(&path, &env).is_err());
    }

    #[test]
    fn test_unknown_and_self_dependencies() {
        let env = Environment::default();
        let path = PathBuf::from("muster.toml");

        let mut api = service(&["api"]);
        api.deps = Some(vec!["db".to_owned()]);
        let err = project(vec![("api", api)])
            .to_project(&path, &env)
            .unwrap_err();
        assert!(err.to_string().contains("unknown dependency `db`"));

        let mut api = service(&["api"]);
        api.deps = Some(vec!["api".to_owned()]);
        let err = project(vec![("api", api)])
            .to_project(&path, &env)
            .unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let mut a = service(&["a"]);
        a.deps = Some(vec!["b".to_owned()]);
        let mut b = service(&["b"]);
        b.deps = Some(vec!["c".to_owned()]);
        let mut c = service(&["c"]);
        c.deps = Some(vec!["a".to_owned()]);

        let err = project(vec![("a", a), ("b", b), ("c", c)])
            .to_project(&PathBuf::from("muster.toml"), &Environment::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error(s): dependency cycle: a -> b -> c -> a"
        );
    }

    #[test]
    fn test_healthcheck_requires_single_probe() {
        let mut db = service(&["postgres"]);
        db.healthcheck = Some(RawHealthCheck {
            cmd: Some(vec!["pg_isready".to_owned()]),
            tcp: Some("localhost:5432".to_owned()),
            ..RawHealthCheck::default()
        });
        let err = project(vec![("db", db)])
            .to_project(&PathBuf::from("muster.toml"), &Environment::default())
            .unwrap_err();
        assert!(err.to_string().contains("exactly one of"));

        let mut db = service(&["postgres"]);
        db.healthcheck = Some(RawHealthCheck::default());
        assert!(project(vec![("db", db)])
            .to_project(&PathBuf::from("muster.toml"), &Environment::default())
            .is_err());
    }

    #[test]
    fn test_healthcheck_defaults_and_tcp() {
        let mut db = service(&["postgres"]);
        db.healthcheck = Some(RawHealthCheck {
            tcp: Some("${POSTGRES_HOST:-localhost}:5432".to_owned()),
            interval: Some("5s".to_owned()),
            ..RawHealthCheck::default()
        });

        let project = project(vec![("db", db)])
            .to_project(&PathBuf::from("muster.toml"), &Environment::default())
            .unwrap();
        let check = project.services["db"].healthcheck.clone().unwrap();

        assert_eq!(
            check.probe,
            Probe::Tcp {
                host: "localhost".to_owned(),
                port: 5432
            }
        );
        assert_eq!(check.interval, Duration::from_secs(5));
        assert_eq!(check.timeout, DEFAULT_TIMEOUT);
        assert_eq!(check.retries, DEFAULT_RETRIES);
        assert_eq!(check.start_period, Duration::ZERO);
    }

    #[test]
    fn test_parse_restart() {
        assert_eq!(parse_restart("no").unwrap(), Restart::Never);
        assert_eq!(
            parse_restart("on-failure").unwrap(),
            Restart::OnFailure {
                max_retries: DEFAULT_ON_FAILURE_RETRIES
            }
        );
        assert_eq!(
            parse_restart("on-failure:2").unwrap(),
            Restart::OnFailure { max_retries: 2 }
        );
        assert_eq!(
            parse_restart("always:4").unwrap(),
            Restart::Always {
                max_retries: Some(4)
            }
        );
        assert!(parse_restart("sometimes").is_err());
        assert!(parse_restart("on-failure:x").is_err());
        assert!(parse_restart("no:3").is_err());
    }

    #[test]
    fn test_unsupported_version() {
        let mut raw = project(vec![("a", service(&["a"]))]);
        raw.version = 2;
        assert!(raw
            .to_project(&PathBuf::from("muster.toml"), &Environment::default())
            .is_err());
    }
}
