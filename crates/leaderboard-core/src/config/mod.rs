//! Run configuration: loading, interpolation and override resolution.
//!
//! A configuration is a nested string-keyed mapping read from YAML. The
//! resolver turns `(config path, model override)` into the final
//! [`Configuration`] used by every stage:
//!
//! 1. Existing file: parse, require a top-level mapping, resolve `${...}`
//!    interpolations, backfill the wandb identity keys.
//! 2. Missing file: the built-in default configuration.
//! 3. Apply the override rule table (see [`overrides`]).

pub mod error;
pub mod interpolate;
pub mod overrides;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub use error::{ConfigError, ConfigResult};
pub use interpolate::{interpolate, interpolate_with};
pub use overrides::{apply_overrides, derive_run_name, rules_for, BaseConfig, OverrideFacts, OverrideRule};

/// Dotted key paths the orchestrator reads or writes.
pub mod keys {
    pub const WANDB_ENTITY: &str = "wandb.entity";
    pub const WANDB_PROJECT: &str = "wandb.project";
    pub const WANDB_RUN_NAME: &str = "wandb.run_name";
    pub const WANDB_LOG: &str = "wandb.log";
    pub const MODEL_PATH: &str = "model.pretrained_model_name_or_path";
    pub const TOKENIZER_PATH: &str = "tokenizer.pretrained_model_name_or_path";
    pub const MTBENCH_MODEL_ID: &str = "mtbench.model_id";
}

pub const DEFAULT_ENTITY: &str = "default_entity";
pub const DEFAULT_PROJECT: &str = "default_project";
pub const DEFAULT_RUN_NAME: &str = "default_run_name";

/// Nested run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(Map<String, Value>);

impl Configuration {
    /// Wrap an already-validated mapping.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// The minimal configuration used when no config file exists.
    pub fn default_config() -> Self {
        let mut config = Self::default();
        config.set(keys::WANDB_ENTITY, DEFAULT_ENTITY);
        config.set(keys::WANDB_PROJECT, DEFAULT_PROJECT);
        config.set(keys::WANDB_RUN_NAME, DEFAULT_RUN_NAME);
        config
    }

    /// Look up a value by dotted path (`"wandb.entity"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Set a value by dotted path, creating intermediate mappings.
    ///
    /// A non-mapping value on the way is replaced by a mapping.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value.into());
    }

    /// Whether results and artifacts should be published (`wandb.log`).
    pub fn logging_enabled(&self) -> bool {
        self.get_bool(keys::WANDB_LOG).unwrap_or(false)
    }

    /// Typed view of the `wandb` section.
    pub fn wandb(&self) -> WandbSettings {
        let text = |key: &str, fallback: &str| {
            self.get_str(key)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        WandbSettings {
            entity: text(keys::WANDB_ENTITY, DEFAULT_ENTITY),
            project: text(keys::WANDB_PROJECT, DEFAULT_PROJECT),
            run_name: text(keys::WANDB_RUN_NAME, DEFAULT_RUN_NAME),
            log: self.logging_enabled(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Serialize back to a YAML document.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(&self.0).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Fill missing or empty wandb identity keys from the defaults.
    fn backfill_identity(&mut self) {
        for (key, fallback) in [
            (keys::WANDB_ENTITY, DEFAULT_ENTITY),
            (keys::WANDB_PROJECT, DEFAULT_PROJECT),
            (keys::WANDB_RUN_NAME, DEFAULT_RUN_NAME),
        ] {
            let present = self.get_str(key).is_some_and(|s| !s.is_empty());
            if !present {
                debug!(key, fallback, "Backfilling wandb identity key");
                self.set(key, fallback);
            }
        }
    }
}

/// Typed view of the tracking section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WandbSettings {
    pub entity: String,
    pub project: String,
    pub run_name: String,
    pub log: bool,
}

/// Parse a YAML document into a configuration.
///
/// An empty document is an empty mapping; any other non-mapping top level
/// is rejected. Interpolations are resolved against the process environment.
pub fn parse_document(path: &Path, text: &str) -> ConfigResult<Configuration> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let value: Value = serde_json::to_value(yaml).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let map = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ConfigError::NotAMapping {
                path: path.to_path_buf(),
                found: value_kind(&other).to_string(),
            })
        }
    };

    let resolved = interpolate(&Value::Object(map))?;
    match resolved {
        Value::Object(map) => Ok(Configuration::from_map(map)),
        other => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
            found: value_kind(&other).to_string(),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

type PathProbe = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Resolves `(config path, model override)` into the final configuration.
pub struct ConfigResolver {
    is_local_path: PathProbe,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self {
            is_local_path: Box::new(|candidate| Path::new(candidate).exists()),
        }
    }
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom probe to decide whether an override names a local path.
    pub fn with_path_probe(probe: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            is_local_path: Box::new(probe),
        }
    }

    /// Load the base configuration: the parsed file, or the default when absent.
    pub fn load_base(&self, config_path: &Path) -> ConfigResult<BaseConfig> {
        if !config_path.exists() {
            info!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(BaseConfig::Default);
        }
        let text = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        let mut config = parse_document(config_path, &text)?;
        config.backfill_identity();
        info!(path = %config_path.display(), "Loaded config file");
        Ok(BaseConfig::Parsed(config))
    }

    /// Resolve the configuration for a run.
    pub fn resolve(
        &self,
        config_path: &Path,
        model_override: Option<&str>,
    ) -> ConfigResult<Configuration> {
        let base = self.load_base(config_path)?;
        let facts = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|model| OverrideFacts {
                model: model.to_string(),
                is_local_path: (self.is_local_path)(model),
            });
        Ok(apply_overrides(base, facts.as_ref()))
    }
}

/// Resolve with the default resolver (local-path probe = filesystem).
pub fn resolve(config_path: &Path, model_override: Option<&str>) -> ConfigResult<Configuration> {
    ConfigResolver::default().resolve(config_path, model_override)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_shape() {
        let config = Configuration::default_config();
        assert_eq!(
            config.to_value(),
            json!({"wandb": {
                "entity": "default_entity",
                "project": "default_project",
                "run_name": "default_run_name"
            }})
        );
        assert!(!config.logging_enabled());
    }

    #[test]
    fn test_set_creates_and_replaces_intermediates() {
        let mut config = Configuration::default();
        config.set("mtbench", "scalar");
        config.set("mtbench.model_id", "org/model");
        assert_eq!(config.get_str("mtbench.model_id"), Some("org/model"));
    }

    #[test]
    fn test_get_missing_path() {
        let config = Configuration::default_config();
        assert!(config.get("wandb.entity.deeper").is_none());
        assert!(config.get("model").is_none());
    }

    #[test]
    fn test_parse_rejects_sequence() {
        let err = parse_document(Path::new("c.yaml"), "- a\n- b\n").unwrap_err();
        match err {
            ConfigError::NotAMapping { found, .. } => assert_eq!(found, "sequence"),
            other => panic!("expected NotAMapping, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_scalar() {
        let err = parse_document(Path::new("c.yaml"), "just text").unwrap_err();
        assert!(matches!(err, ConfigError::NotAMapping { .. }));
    }

    #[test]
    fn test_parse_syntax_error() {
        let err = parse_document(Path::new("c.yaml"), "wandb: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_empty_document_is_empty_mapping() {
        let config = parse_document(Path::new("c.yaml"), "").unwrap();
        assert!(config.as_map().is_empty());
    }

    #[test]
    fn test_backfill_identity_keeps_present_keys() {
        let mut config = parse_document(
            Path::new("c.yaml"),
            "wandb:\n  entity: team\n  project: ''\n",
        )
        .unwrap();
        config.backfill_identity();
        let wandb = config.wandb();
        assert_eq!(wandb.entity, "team");
        assert_eq!(wandb.project, DEFAULT_PROJECT);
        assert_eq!(wandb.run_name, DEFAULT_RUN_NAME);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Configuration::default_config();
        config.set(keys::WANDB_LOG, true);
        let yaml = config.to_yaml().unwrap();
        let reparsed = parse_document(Path::new("c.yaml"), &yaml).unwrap();
        assert_eq!(reparsed, config);
    }
}
