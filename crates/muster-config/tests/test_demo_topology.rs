use std::{path::PathBuf, time::Duration};

use muster_config::{load_with_env, Environment};
use muster_types::{Condition, Probe, Restart};
use pretty_assertions::assert_eq;

fn demo() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/airweave/muster.toml")
}

#[test]
fn test_demo_topology_loads_with_defaults() {
    let project = load_with_env(&demo(), &Environment::from_pairs([("HOME", "/root")])).unwrap();

    assert_eq!(project.name, "airweave");
    assert_eq!(
        project.services.keys().collect::<Vec<_>>(),
        vec![
            "backend",
            "db",
            "frontend",
            "neo4j",
            "redis",
            "text2vec-transformers",
            "weaviate",
        ]
    );
    assert_eq!(project.settings.stall_timeout, Duration::from_secs(120));

    let backend = &project.services["backend"];
    let deps: Vec<(&str, Condition)> = backend
        .deps
        .iter()
        .map(|d| (d.service.as_str(), d.condition))
        .collect();
    assert_eq!(
        deps,
        vec![
            ("db", Condition::Healthy),
            ("redis", Condition::Healthy),
            ("weaviate", Condition::Healthy),
            ("neo4j", Condition::Healthy),
        ]
    );
    assert_eq!(backend.restart, Restart::OnFailure { max_retries: 3 });
    assert!(backend.cwd.as_ref().unwrap().ends_with("backend"));
    assert_eq!(backend.env["LOCAL_DEVELOPMENT"], "true");

    let weaviate = project.services["weaviate"].healthcheck.as_ref().unwrap();
    assert_eq!(
        weaviate.probe,
        Probe::Http("http://localhost:8087/v1/.well-known/ready".to_owned())
    );
    assert_eq!(weaviate.interval, Duration::from_secs(10));
    assert_eq!(weaviate.retries, 3);
    assert_eq!(weaviate.start_period, Duration::from_secs(30));

    let db = &project.services["db"];
    assert_eq!(db.restart, Restart::OnFailure { max_retries: 5 });
    let db_check = db.healthcheck.as_ref().unwrap();
    assert_eq!(db_check.retries, 5);
    assert_eq!(db_check.interval, Duration::from_secs(5));

    let frontend = project.services["frontend"].healthcheck.as_ref().unwrap();
    assert_eq!(frontend.probe, Probe::Http("http://localhost:8080/".to_owned()));
}

#[test]
fn test_demo_topology_takes_environment_overrides() {
    let env = Environment::from_pairs([
        ("PROJECT_NAME", "airweave-dev"),
        ("POSTGRES_USER", "pg"),
        ("WEAVIATE_PORT", "9000"),
        ("ENCRYPTION_KEY", "SpLbmhQ9eTvT8Hc6Xb8_ZdvWdT8e3j7pLkz2mRZQx6s="),
    ]);
    let project = load_with_env(&demo(), &env).unwrap();

    assert_eq!(project.name, "airweave-dev");
    let Some(Probe::Cmd(argv)) = project.services["db"].healthcheck.as_ref().map(|h| &h.probe)
    else {
        panic!("db probe is a command");
    };
    assert_eq!(argv[argv.len() - 2..], ["-U".to_owned(), "pg".to_owned()]);
    assert_eq!(
        project.services["weaviate"].healthcheck.as_ref().unwrap().probe,
        Probe::Http("http://localhost:9000/v1/.well-known/ready".to_owned())
    );
    for service in project.services.values() {
        assert_eq!(
            service.env["ENCRYPTION_KEY"],
            "SpLbmhQ9eTvT8Hc6Xb8_ZdvWdT8e3j7pLkz2mRZQx6s="
        );
    }
}

#[test]
fn test_blank_encryption_key_is_generated() {
    let env = Environment::from_pairs([("ENCRYPTION_KEY", "")]);
    let project = load_with_env(&demo(), &env).unwrap();

    let key = &project.services["backend"].env["ENCRYPTION_KEY"];
    assert_eq!(key.len(), 44);
    assert!(key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')));
    assert_eq!(&project.services["frontend"].env["ENCRYPTION_KEY"], key);
}
