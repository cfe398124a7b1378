use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::RngCore;

use crate::{
    raw::{Generator, RawVariable, RawVariableSpec},
    ConfigError,
};

/// Values visible to a topology while it is being loaded: the process
/// environment layered over an optional env file.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    process: HashMap<String, String>,
    file: BTreeMap<String, String>,
}

impl Environment {
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            process: std::env::vars().collect(),
            file: BTreeMap::new(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            process: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            file: BTreeMap::new(),
        }
    }

    /// Layer an env file (`KEY=value` lines) under the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or a line is malformed.
    pub fn with_env_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.file = parse_env_file(&text)?;
        tracing::debug!("Loaded {} variables from {path:?}", self.file.len());
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.process
            .get(name)
            .or_else(|| self.file.get(name))
            .map(String::as_str)
    }

    pub(crate) fn resolve(
        &self,
        declared: &BTreeMap<String, RawVariable>,
    ) -> Result<Variables<'_>, ConfigError> {
        let mut exported = BTreeMap::new();

        for (name, variable) in declared {
            let current = self.lookup(name).filter(|v| !v.is_empty());
            let spec = match variable {
                RawVariable::Value(value) => RawVariableSpec {
                    default: Some(value.clone()),
                    ..RawVariableSpec::default()
                },
                RawVariable::Spec(spec) => spec.clone(),
            };

            let value = match (current, spec.default, spec.generate) {
                (Some(value), _, _) => value.to_owned(),
                (None, Some(default), _) => default.into_string(),
                (None, None, Some(generator)) => {
                    tracing::info!("Generated a value for {name}");
                    generate(generator)
                }
                (None, None, None) if spec.required => {
                    return Err(ConfigError::MissingVariable {
                        name: name.clone(),
                        message: Some("declared as required".to_owned()),
                    });
                }
                (None, None, None) => String::new(),
            };

            exported.insert(name.clone(), value);
        }

        Ok(Variables {
            exported,
            environment: self,
        })
    }
}

/// Declared variables after resolution, falling back to the environment for
/// names the topology does not declare.
#[derive(Debug)]
pub(crate) struct Variables<'e> {
    pub exported: BTreeMap<String, String>,
    environment: &'e Environment,
}

impl Variables<'_> {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.exported
            .get(name)
            .map(String::as_str)
            .or_else(|| self.environment.lookup(name))
    }
}

fn generate(generator: Generator) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    match generator {
        Generator::Fernet => URL_SAFE.encode(bytes),
        Generator::Hex32 => hex::encode(bytes),
    }
}

fn parse_env_file(text: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut values = BTreeMap::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Validation(format!(
                "env file line {}: expected KEY=value",
                index + 1
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Validation(format!(
                "env file line {}: empty key",
                index + 1
            )));
        }

        values.insert(key.to_owned(), unquote(value.trim()));
    }

    Ok(values)
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_owned();
        }
    }
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_owned(),
        None => value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::raw::RawScalar;

    use super::*;

    #[test]
    fn test_parse_env_file() {
        let text = r#"
            # Postgres
            POSTGRES_USER=airweave
            export POSTGRES_PASSWORD="airweave1234!"
            NEO4J_PASSWORD='secret # not a comment'
            RUN_DB_SYNC=true # inline comment
            ENCRYPTION_KEY=
        "#;

        let values = parse_env_file(text).unwrap();
        assert_eq!(values["POSTGRES_USER"], "airweave");
        assert_eq!(values["POSTGRES_PASSWORD"], "airweave1234!");
        assert_eq!(values["NEO4J_PASSWORD"], "secret # not a comment");
        assert_eq!(values["RUN_DB_SYNC"], "true");
        assert_eq!(values["ENCRYPTION_KEY"], "");
    }

    #[test]
    fn test_parse_env_file_rejects_garbage() {
        assert!(parse_env_file("JUST_A_KEY").is_err());
        assert!(parse_env_file("=value").is_err());
    }

    #[test]
    fn test_process_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "PORT=1\nHOST=db").unwrap();

        let env = Environment::from_pairs([("PORT", "2")])
            .with_env_file(file.path())
            .unwrap();

        assert_eq!(env.lookup("PORT"), Some("2"));
        assert_eq!(env.lookup("HOST"), Some("db"));
        assert_eq!(env.lookup("MISSING"), None);
    }

    #[test]
    fn test_resolve_declared_variables() {
        let env = Environment::from_pairs([("POSTGRES_USER", "override"), ("ENCRYPTION_KEY", "")]);
        let declared = BTreeMap::from([
            (
                "POSTGRES_USER".to_owned(),
                RawVariable::Value(RawScalar::String("airweave".to_owned())),
            ),
            (
                "WEAVIATE_PORT".to_owned(),
                RawVariable::Value(RawScalar::Integer(8087)),
            ),
            (
                "ENCRYPTION_KEY".to_owned(),
                RawVariable::Spec(RawVariableSpec {
                    generate: Some(Generator::Fernet),
                    ..RawVariableSpec::default()
                }),
            ),
        ]);

        let vars = env.resolve(&declared).unwrap();
        assert_eq!(vars.get("POSTGRES_USER"), Some("override"));
        assert_eq!(vars.get("WEAVIATE_PORT"), Some("8087"));

        let key = vars.get("ENCRYPTION_KEY").unwrap();
        assert_eq!(URL_SAFE.decode(key).unwrap().len(), 32);
    }

    #[test]
    fn test_required_variable_fails_fast() {
        let declared = BTreeMap::from([(
            "FIRST_SUPERUSER".to_owned(),
            RawVariable::Spec(RawVariableSpec {
                required: true,
                ..RawVariableSpec::default()
            }),
        )]);

        let err = Environment::default().resolve(&declared).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingVariable { ref name, .. } if name == "FIRST_SUPERUSER")
        );
    }
}
