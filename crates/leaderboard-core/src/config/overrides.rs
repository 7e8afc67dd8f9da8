//! Model-override rule table.
//!
//! | Base    | Override  | Local path | Rules                                         |
//! |---------|-----------|------------|-----------------------------------------------|
//! | Default | any       | any        | `DropOverride`                                |
//! | Parsed  | none      | -          | (none)                                        |
//! | Parsed  | non-empty | no         | `ModelAndTokenizer`, `RunName`, `MtbenchModelId` |
//! | Parsed  | non-empty | yes        | `ModelAndTokenizer`, `RunName`                |
//!
//! Without a config file the override is ignored. Callers that only want an
//! override must provide a (possibly empty) config file.

use tracing::{debug, warn};

use super::{keys, Configuration};

/// Configuration before overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseConfig {
    /// Parsed from an existing config file.
    Parsed(Configuration),
    /// No config file existed.
    Default,
}

/// What the resolver knows about a non-empty model override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideFacts {
    pub model: String,
    /// Whether the override names an existing filesystem path.
    pub is_local_path: bool,
}

/// A single rewrite applied during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideRule {
    /// No base file: the override is discarded.
    DropOverride,
    /// Point model and tokenizer at the override.
    ModelAndTokenizer,
    /// Derive `wandb.run_name` from the override.
    RunName,
    /// Use the override verbatim as the MT-Bench model id.
    MtbenchModelId,
}

/// Select the rules for a base/override combination.
pub fn rules_for(base: &BaseConfig, facts: Option<&OverrideFacts>) -> Vec<OverrideRule> {
    match (base, facts) {
        (_, None) => Vec::new(),
        (BaseConfig::Default, Some(_)) => vec![OverrideRule::DropOverride],
        (BaseConfig::Parsed(_), Some(facts)) if facts.is_local_path => {
            vec![OverrideRule::ModelAndTokenizer, OverrideRule::RunName]
        }
        (BaseConfig::Parsed(_), Some(_)) => vec![
            OverrideRule::ModelAndTokenizer,
            OverrideRule::RunName,
            OverrideRule::MtbenchModelId,
        ],
    }
}

/// Run name derived from a model identifier or path.
///
/// `org/model` becomes `org_model`; leading and trailing separators are dropped.
pub fn derive_run_name(model: &str) -> String {
    model.trim_matches('/').replace('/', "_")
}

/// Apply the rule table and return the final configuration.
pub fn apply_overrides(base: BaseConfig, facts: Option<&OverrideFacts>) -> Configuration {
    let rules = rules_for(&base, facts);
    let mut config = match base {
        BaseConfig::Parsed(config) => config,
        BaseConfig::Default => Configuration::default_config(),
    };
    let Some(facts) = facts else {
        return config;
    };

    for rule in rules {
        debug!(?rule, model = %facts.model, "Applying override rule");
        match rule {
            OverrideRule::DropOverride => {
                warn!(
                    model = %facts.model,
                    "No config file found; model override ignored"
                );
            }
            OverrideRule::ModelAndTokenizer => {
                config.set(keys::MODEL_PATH, facts.model.as_str());
                config.set(keys::TOKENIZER_PATH, facts.model.as_str());
            }
            OverrideRule::RunName => {
                let run_name = derive_run_name(&facts.model);
                if !run_name.is_empty() {
                    config.set(keys::WANDB_RUN_NAME, run_name);
                }
            }
            OverrideRule::MtbenchModelId => {
                config.set(keys::MTBENCH_MODEL_ID, facts.model.as_str());
            }
        }
    }
    config
}
