use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawProject {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: Option<String>,
    #[serde(default)]
    pub settings: RawSettings,
    #[serde(default)]
    pub variables: BTreeMap<String, RawVariable>,
    pub services: BTreeMap<String, RawService>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSettings {
    pub stall_timeout: Option<String>,
    pub kill_timeout: Option<String>,
    pub restart_backoff: Option<RawBackoff>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawBackoff {
    pub base: Option<String>,
    pub max: Option<String>,
}

/// TOML scalars accepted where a string is expected (`PORT = 8001`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawScalar {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl RawScalar {
    pub fn into_string(self) -> String {
        match self {
            RawScalar::String(s) => s,
            RawScalar::Integer(i) => i.to_string(),
            RawScalar::Float(f) => f.to_string(),
            RawScalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawVariable {
    Value(RawScalar),
    Spec(RawVariableSpec),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawVariableSpec {
    pub default: Option<RawScalar>,
    pub generate: Option<Generator>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Generator {
    /// 32 random bytes, URL-safe base64.
    Fernet,
    /// 32 random bytes, lowercase hex.
    Hex32,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    pub cmd: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<BTreeMap<String, RawScalar>>,
    pub deps: Option<Vec<String>>,
    pub depends_on: Option<RawDependsOn>,
    pub healthcheck: Option<RawHealthCheck>,
    pub restart: Option<String>,
}

/// Both forms keep declaration order; the gate reports blockers in it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDependsOn {
    List(Vec<String>),
    Map(IndexMap<String, RawCondition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RawCondition {
    #[serde(alias = "service_started")]
    Started,
    #[serde(alias = "service_healthy")]
    Healthy,
    #[serde(alias = "service_completed_successfully")]
    CompletedSuccessfully,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawHealthCheck {
    pub cmd: Option<Vec<String>>,
    pub shell: Option<String>,
    pub http: Option<String>,
    pub tcp: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub start_period: Option<String>,
}
