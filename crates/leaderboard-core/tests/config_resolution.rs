//! Configuration resolution against real files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use leaderboard_core::config::{
    keys, ConfigError, ConfigResolver, Configuration, DEFAULT_ENTITY, DEFAULT_PROJECT,
    DEFAULT_RUN_NAME,
};
use serde_json::json;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, body).unwrap();
    path
}

fn hub_resolver() -> ConfigResolver {
    ConfigResolver::with_path_probe(|_| false)
}

const MAPPINGS: &[&str] = &[
    "",
    "{}\n",
    "wandb:\n  log: true\n",
    "wandb:\n  entity: team\n  project: leaderboard\n  run_name: nightly\n",
    "wandb:\n  entity: ''\n  run_name: ~\nmodel:\n  pretrained_model_name_or_path: base\n",
    "mtbench:\n  model_id: base-id\nother:\n  nested:\n    deep: [1, 2, 3]\n",
];

#[test]
fn test_identity_keys_non_empty_for_any_mapping() {
    let dir = TempDir::new().unwrap();
    for body in MAPPINGS {
        let path = write_config(&dir, body);
        for model in [None, Some("org/model")] {
            let config = hub_resolver().resolve(&path, model).unwrap();
            for key in [keys::WANDB_ENTITY, keys::WANDB_PROJECT, keys::WANDB_RUN_NAME] {
                let value = config.get_str(key).unwrap_or_default();
                assert!(!value.is_empty(), "{key} empty for {body:?} / {model:?}");
            }
        }
    }
}

#[test]
fn test_override_sets_model_and_tokenizer_for_any_mapping() {
    let dir = TempDir::new().unwrap();
    for body in MAPPINGS {
        let path = write_config(&dir, body);
        for local in [false, true] {
            let resolver = ConfigResolver::with_path_probe(move |_| local);
            let config = resolver.resolve(&path, Some("org/model-7b")).unwrap();
            assert_eq!(config.get_str(keys::MODEL_PATH), Some("org/model-7b"));
            assert_eq!(config.get_str(keys::TOKENIZER_PATH), Some("org/model-7b"));
            assert_eq!(config.get_str(keys::WANDB_RUN_NAME), Some("org_model-7b"));
        }
    }
}

#[test]
fn test_missing_file_returns_exact_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nope").join("config.yaml");
    let expected = json!({"wandb": {
        "entity": "default_entity",
        "project": "default_project",
        "run_name": "default_run_name",
    }});

    for model in [None, Some(""), Some("org/model"), Some("/local/model")] {
        let config = hub_resolver().resolve(&path, model).unwrap();
        assert_eq!(config.to_value(), expected, "override {model:?}");
        assert_eq!(config, Configuration::default_config());
    }
}

#[test]
fn test_mtbench_model_id_depends_on_local_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "mtbench:\n  model_id: configured\n");

    let hub = hub_resolver().resolve(&path, Some("org/model")).unwrap();
    assert_eq!(hub.get_str(keys::MTBENCH_MODEL_ID), Some("org/model"));

    let model_dir = dir.path().join("weights");
    fs::create_dir(&model_dir).unwrap();
    let local = ConfigResolver::new()
        .resolve(&path, model_dir.to_str())
        .unwrap();
    assert_eq!(local.get_str(keys::MTBENCH_MODEL_ID), Some("configured"));
    assert_eq!(
        local.get_str(keys::MODEL_PATH),
        Some(model_dir.to_str().unwrap())
    );
}

#[test]
fn test_blank_override_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "wandb:\n  run_name: keep\n");
    let config = hub_resolver().resolve(&path, Some("   ")).unwrap();
    assert_eq!(config.get_str(keys::WANDB_RUN_NAME), Some("keep"));
    assert!(config.get(keys::MODEL_PATH).is_none());
}

#[test]
fn test_interpolation_and_backfill() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "base: org/llm\nmodel:\n  pretrained_model_name_or_path: ${base}\ntokenizer:\n  pretrained_model_name_or_path: ${model.pretrained_model_name_or_path}\nlabel: run-${base}\n",
    );
    let config = hub_resolver().resolve(&path, None).unwrap();
    assert_eq!(config.get_str(keys::TOKENIZER_PATH), Some("org/llm"));
    assert_eq!(config.get_str("label"), Some("run-org/llm"));
    let wandb = config.wandb();
    assert_eq!(wandb.entity, DEFAULT_ENTITY);
    assert_eq!(wandb.project, DEFAULT_PROJECT);
    assert_eq!(wandb.run_name, DEFAULT_RUN_NAME);
    assert!(!wandb.log);
}

#[test]
fn test_non_mapping_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "- one\n- two\n");
    let err = hub_resolver().resolve(&path, Some("org/model")).unwrap_err();
    assert!(matches!(err, ConfigError::NotAMapping { .. }));
}

#[test]
fn test_unresolvable_reference_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "a: ${missing.key}\n");
    let err = hub_resolver().resolve(&path, None).unwrap_err();
    assert!(matches!(err, ConfigError::Interpolation { .. }));
}

#[test]
fn test_free_resolve_matches_default_resolver() {
    let path = Path::new("/definitely/not/here/config.yaml");
    let config = leaderboard_core::config::resolve(path, Some("org/model")).unwrap();
    assert_eq!(config, Configuration::default_config());
}
