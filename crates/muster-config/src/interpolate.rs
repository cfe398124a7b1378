//! `${VAR}` substitution for topology strings.
//!
//! Supported forms:
//!
//! | form               | result                                         |
//! |--------------------|------------------------------------------------|
//! | `$VAR`, `${VAR}`   | value of `VAR`, error when unset               |
//! | `${VAR:-default}`  | `default` when `VAR` is unset or empty         |
//! | `${VAR-default}`   | `default` when `VAR` is unset                  |
//! | `${VAR:?message}`  | error with `message` when unset or empty       |
//! | `${VAR?message}`   | error with `message` when unset                |
//! | `$$`               | a literal `$`                                  |
//!
//! Defaults are interpolated themselves, so `${A:-${B}}` works.

use crate::ConfigError;

pub(crate) fn interpolate<'a, F>(input: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body_start) = after.strip_prefix('{') {
            let end = matching_brace(body_start).ok_or_else(|| {
                ConfigError::Interpolation(format!("unterminated `${{` in {input:?}"))
            })?;
            out.push_str(&expand(&body_start[..end], lookup)?);
            rest = &body_start[end + 1..];
        } else {
            let len = name_len(after);
            if len == 0 {
                out.push('$');
                rest = after;
            } else {
                let name = &after[..len];
                let value = lookup(name).ok_or_else(|| ConfigError::MissingVariable {
                    name: name.to_owned(),
                    message: None,
                })?;
                out.push_str(value);
                rest = &after[len..];
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn name_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(s.len(), |(i, _)| i)
}

fn expand<'a, F>(body: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let len = name_len(body);
    if len == 0 {
        return Err(ConfigError::Interpolation(format!(
            "invalid variable reference `${{{body}}}`"
        )));
    }
    let name = &body[..len];
    let modifier = &body[len..];
    let value = lookup(name);
    let missing = |message: Option<&str>| ConfigError::MissingVariable {
        name: name.to_owned(),
        message: message.filter(|m| !m.is_empty()).map(str::to_owned),
    };

    if modifier.is_empty() {
        return value.map(str::to_owned).ok_or_else(|| missing(None));
    }
    if let Some(default) = modifier.strip_prefix(":-") {
        return match value {
            Some(v) if !v.is_empty() => Ok(v.to_owned()),
            _ => interpolate(default, lookup),
        };
    }
    if let Some(default) = modifier.strip_prefix('-') {
        return match value {
            Some(v) => Ok(v.to_owned()),
            None => interpolate(default, lookup),
        };
    }
    if let Some(message) = modifier.strip_prefix(":?") {
        return match value {
            Some(v) if !v.is_empty() => Ok(v.to_owned()),
            _ => Err(missing(Some(message))),
        };
    }
    if let Some(message) = modifier.strip_prefix('?') {
        return value.map(str::to_owned).ok_or_else(|| missing(Some(message)));
    }

    Err(ConfigError::Interpolation(format!(
        "unsupported modifier in `${{{body}}}`"
    )))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn run(input: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        interpolate(input, &|name: &str| vars.get(name).map(String::as_str))
    }

    #[test]
    fn test_plain_references() {
        let vars = [("USER", "airweave"), ("PORT", "5432")];
        assert_eq!(run("${USER}", &vars).unwrap(), "airweave");
        assert_eq!(run("$USER@db:$PORT", &vars).unwrap(), "airweave@db:5432");
        assert_eq!(run("no variables", &vars).unwrap(), "no variables");
    }

    #[test]
    fn test_defaults() {
        let vars = [("EMPTY", "")];
        assert_eq!(run("${HOST:-localhost}", &vars).unwrap(), "localhost");
        assert_eq!(run("${EMPTY:-fallback}", &vars).unwrap(), "fallback");
        assert_eq!(run("${EMPTY-fallback}", &vars).unwrap(), "");
        assert_eq!(run("${A:-${B:-nested}}", &vars).unwrap(), "nested");
    }

    #[test]
    fn test_missing_variable_names_key() {
        let err = run("${FIRST_SUPERUSER}", &[]).unwrap_err();
        match err {
            ConfigError::MissingVariable { name, message } => {
                assert_eq!(name, "FIRST_SUPERUSER");
                assert_eq!(message, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = run("${KEY:?must be set}", &[("KEY", "")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVariable { message: Some(ref m), .. } if m == "must be set"
        ));
    }

    #[test]
    fn test_escapes_and_literals() {
        assert_eq!(run("cost: $$5", &[]).unwrap(), "cost: $5");
        assert_eq!(run("trailing $", &[]).unwrap(), "trailing $");
        assert_eq!(run("$1", &[]).unwrap(), "$1");
    }

    #[test]
    fn test_malformed_references() {
        assert!(matches!(
            run("${UNCLOSED", &[]),
            Err(ConfigError::Interpolation(_))
        ));
        assert!(matches!(run("${}", &[]), Err(ConfigError::Interpolation(_))));
        assert!(matches!(
            run("${A:+x}", &[("A", "1")]),
            Err(ConfigError::Interpolation(_))
        ));
    }
}
