//! `${...}` interpolation over a configuration tree.
//!
//! Supported forms:
//! - `${a.b.c}` references another key of the same document
//! - `${oc.env:VAR}` and `${oc.env:VAR,default}` read the environment
//!
//! A string that consists of exactly one interpolation takes the referenced
//! value with its type; otherwise each occurrence is rendered as text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::error::{ConfigError, ConfigResult};

const MAX_DEPTH: usize = 32;
const ENV_PREFIX: &str = "oc.env:";

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid interpolation pattern"))
}

/// Resolve interpolations using the process environment.
pub fn interpolate(root: &Value) -> ConfigResult<Value> {
    interpolate_with(root, &|name| std::env::var(name).ok())
}

/// Resolve interpolations with an explicit environment lookup.
pub fn interpolate_with(root: &Value, env: &dyn Fn(&str) -> Option<String>) -> ConfigResult<Value> {
    Resolver { root, env }.resolve(root, 0)
}

struct Resolver<'a> {
    root: &'a Value,
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Resolver<'_> {
    fn resolve(&self, value: &Value, depth: usize) -> ConfigResult<Value> {
        match value {
            Value::String(text) => self.resolve_string(text, depth),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, depth))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve(item, depth)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, text: &str, depth: usize) -> ConfigResult<Value> {
        let re = pattern();
        if let Some(caps) = re.captures(text) {
            let whole = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0);
            if whole == text.len() {
                return self.lookup(caps[1].trim(), depth);
            }
        } else {
            return Ok(Value::String(text.to_string()));
        }

        let mut rendered = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            rendered.push_str(&text[last..m.start()]);
            let value = self.lookup(caps[1].trim(), depth)?;
            rendered.push_str(&render(&value));
            last = m.end();
        }
        rendered.push_str(&text[last..]);
        Ok(Value::String(rendered))
    }

    fn lookup(&self, expr: &str, depth: usize) -> ConfigResult<Value> {
        if depth >= MAX_DEPTH {
            return Err(ConfigError::Interpolation {
                expr: expr.to_string(),
                reason: "reference cycle".to_string(),
            });
        }

        if let Some(spec) = expr.strip_prefix(ENV_PREFIX) {
            let (name, default) = match spec.split_once(',') {
                Some((name, default)) => (name.trim(), Some(default.trim())),
                None => (spec.trim(), None),
            };
            return match ((self.env)(name), default) {
                (Some(value), _) => Ok(Value::String(value)),
                (None, Some(default)) => Ok(Value::String(default.to_string())),
                (None, None) => Err(ConfigError::Interpolation {
                    expr: expr.to_string(),
                    reason: format!("environment variable {name} is not set"),
                }),
            };
        }

        let mut current = self.root;
        for segment in expr.split('.') {
            current = current
                .as_object()
                .and_then(|map| map.get(segment))
                .ok_or_else(|| ConfigError::Interpolation {
                    expr: expr.to_string(),
                    reason: "key not found".to_string(),
                })?;
        }
        self.resolve(current, depth + 1)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn whole_string_reference_keeps_type() {
        let root = json!({"a": {"n": 3}, "b": "${a.n}"});
        let out = interpolate_with(&root, &no_env).unwrap();
        assert_eq!(out["b"], json!(3));
    }

    #[test]
    fn embedded_reference_renders_text() {
        let root = json!({"model": "org/llm", "run": "eval-${model}-v${ver}", "ver": 2});
        let out = interpolate_with(&root, &no_env).unwrap();
        assert_eq!(out["run"], json!("eval-org/llm-v2"));
    }

    #[test]
    fn chained_references_resolve() {
        let root = json!({"a": "${b}", "b": "${c}", "c": "end"});
        let out = interpolate_with(&root, &no_env).unwrap();
        assert_eq!(out["a"], json!("end"));
    }

    #[test]
    fn env_reference_with_default() {
        let env = |name: &str| (name == "SET").then(|| "yes".to_string());
        let root = json!({"x": "${oc.env:SET}", "y": "${oc.env:UNSET, fallback}"});
        let out = interpolate_with(&root, &env).unwrap();
        assert_eq!(out["x"], json!("yes"));
        assert_eq!(out["y"], json!("fallback"));
    }

    #[test]
    fn missing_env_without_default_fails() {
        let root = json!({"x": "${oc.env:UNSET}"});
        let err = interpolate_with(&root, &no_env).unwrap_err();
        assert!(err.to_string().contains("UNSET"));
    }

    #[test]
    fn missing_key_fails() {
        let root = json!({"x": "${nope.nothing}"});
        assert!(matches!(
            interpolate_with(&root, &no_env),
            Err(ConfigError::Interpolation { .. })
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let root = json!({"a": "${b}", "b": "${a}"});
        let err = interpolate_with(&root, &no_env).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn arrays_are_walked() {
        let root = json!({"name": "m", "cmd": ["run", "--model", "${name}"]});
        let out = interpolate_with(&root, &no_env).unwrap();
        assert_eq!(out["cmd"], json!(["run", "--model", "m"]));
    }
}
