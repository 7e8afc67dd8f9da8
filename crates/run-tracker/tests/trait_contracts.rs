//! Trait contract tests for Tracker.
//!
//! Every backend must pass the same behavioral checks; each contract is run
//! against both the in-memory fake and the filesystem backend.

use run_tracker::fakes::MemoryTracker;
use run_tracker::tracker::*;
use run_tracker::{FsTracker, TrackerError};
use serde_json::{json, Map, Value};
use std::path::Path;

fn sample_spec() -> RunSpec {
    RunSpec {
        entity: "test-entity".to_string(),
        project: "test-project".to_string(),
        name: "test-run".to_string(),
        job_type: Some("evaluation".to_string()),
        config: json!({"wandb": {"entity": "test-entity"}}),
    }
}

fn values(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

async fn contract_create_run_is_running(tracker: &dyn Tracker) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    let record = tracker.get_run(&run.id).await.unwrap();

    assert_eq!(record.status, RunStatus::Running);
    assert_eq!(record.handle.name, "test-run");
    assert_eq!(record.config["wandb"]["entity"], "test-entity");
    assert!(record.finished_at.is_none());
}

async fn contract_finish_is_terminal(tracker: &dyn Tracker) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    tracker.finish(&run).await.unwrap();

    let record = tracker.get_run(&run.id).await.unwrap();
    assert_eq!(record.status, RunStatus::Finished);
    assert!(record.finished_at.is_some());

    let err = tracker.finish(&run).await.unwrap_err();
    assert!(matches!(err, TrackerError::InvalidRunState { .. }));
}

async fn contract_history_steps_in_order(tracker: &dyn Tracker) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    tracker.log(&run, values("a", json!(1))).await.unwrap();
    tracker.log(&run, values("b", json!(2))).await.unwrap();
    tracker.log(&run, values("c", json!(3))).await.unwrap();

    let history = tracker.history(&run.id).await.unwrap();
    let steps: Vec<u64> = history.iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![0, 1, 2]);
    assert_eq!(history[1].values["b"], json!(2));
}

async fn contract_artifact_versions_increment(tracker: &dyn Tracker, dir: &Path) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    let path = write_file(dir, "config.yaml", "wandb:\n  log: true\n");

    let v0 = tracker
        .attach_artifact(&run, ArtifactSpec::new("config", "config", &path))
        .await
        .unwrap();
    let other = tracker
        .attach_artifact(&run, ArtifactSpec::new("other", "dataset", &path))
        .await
        .unwrap();
    let v1 = tracker
        .attach_artifact(&run, ArtifactSpec::new("config", "config", &path))
        .await
        .unwrap();

    assert_eq!(v0.version, 0);
    assert_eq!(other.version, 0);
    assert_eq!(v1.version, 1);
    assert_eq!(v0.file_name, "config.yaml");
    assert_eq!(
        v0.digest,
        ContentDigest::from_bytes(b"wandb:\n  log: true\n")
    );

    let listed = tracker.artifacts(&run.id).await.unwrap();
    let names: Vec<(&str, u32)> = listed.iter().map(|a| (a.name.as_str(), a.version)).collect();
    assert_eq!(names, vec![("config", 0), ("other", 0), ("config", 1)]);
}

async fn contract_missing_artifact_file(tracker: &dyn Tracker, dir: &Path) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    let err = tracker
        .attach_artifact(
            &run,
            ArtifactSpec::new("config", "config", dir.join("nope.yaml")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::ArtifactMissing { .. }));
}

async fn contract_unknown_run(tracker: &dyn Tracker) {
    let err = tracker
        .get_run(&RunId("deadbeef".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::RunNotFound { .. }));
}

async fn contract_finished_run_rejects_artifacts(tracker: &dyn Tracker, dir: &Path) {
    let run = tracker.create_run(sample_spec()).await.unwrap();
    tracker.finish(&run).await.unwrap();
    let path = write_file(dir, "late.yaml", "x: 1\n");

    let err = tracker
        .attach_artifact(&run, ArtifactSpec::new("config", "config", &path))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidRunState { .. }));
}

async fn contract_unusual_names_are_retrievable(tracker: &dyn Tracker, dir: &Path) {
    for (entity, project) in [("..", "escaped"), (".", ""), ("", "..")] {
        let mut spec = sample_spec();
        spec.entity = entity.to_string();
        spec.project = project.to_string();
        let run = tracker.create_run(spec).await.unwrap();

        let path = write_file(dir, "notes.txt", "ok\n");
        tracker
            .attach_artifact(&run, ArtifactSpec::new("..", "notes", &path))
            .await
            .unwrap();
        tracker.log(&run, values("x", json!(1))).await.unwrap();
        tracker.finish(&run).await.unwrap();

        let record = tracker.get_run(&run.id).await.unwrap();
        assert_eq!(record.handle.entity, entity);
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(tracker.artifacts(&run.id).await.unwrap().len(), 1);
        assert_eq!(tracker.history(&run.id).await.unwrap().len(), 1);
    }
}

async fn run_all_contracts(tracker: &dyn Tracker, dir: &Path) {
    contract_create_run_is_running(tracker).await;
    contract_finish_is_terminal(tracker).await;
    contract_history_steps_in_order(tracker).await;
    contract_artifact_versions_increment(tracker, dir).await;
    contract_missing_artifact_file(tracker, dir).await;
    contract_unknown_run(tracker).await;
    contract_finished_run_rejects_artifacts(tracker, dir).await;
    contract_unusual_names_are_retrievable(tracker, dir).await;
}

#[tokio::test]
async fn memory_tracker_satisfies_contracts() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = MemoryTracker::new();
    run_all_contracts(&tracker, dir.path()).await;
}

#[tokio::test]
async fn fs_tracker_satisfies_contracts() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = FsTracker::new(dir.path().join("runs")).unwrap();
    run_all_contracts(&tracker, dir.path()).await;

    let mut top_level: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    top_level.sort();
    assert!(
        top_level.iter().all(|n| n == "runs" || n.to_string_lossy().ends_with(".yaml") || n == "notes.txt"),
        "tracker wrote outside its root: {top_level:?}"
    );
}

#[tokio::test]
async fn memory_tracker_keeps_artifact_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = MemoryTracker::new();
    let run = tracker.create_run(sample_spec()).await.unwrap();
    let path = write_file(dir.path(), "config.yaml", "model: {}\n");

    tracker
        .attach_artifact(&run, ArtifactSpec::new("config", "config", &path))
        .await
        .unwrap();

    assert_eq!(
        tracker.artifact_bytes(&run.id, "config", 0).as_deref(),
        Some("model: {}\n".as_bytes())
    );
    assert!(tracker.artifact_bytes(&run.id, "config", 1).is_none());
}

#[tokio::test]
async fn fs_tracker_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("runs");
    let run = {
        let tracker = FsTracker::new(&root).unwrap();
        let run = tracker.create_run(sample_spec()).await.unwrap();
        tracker
            .log(&run, values("leaderboard_table", json!({"columns": [], "data": []})))
            .await
            .unwrap();
        tracker.finish(&run).await.unwrap();
        run
    };

    let reopened = FsTracker::new(&root).unwrap();
    let record = reopened.get_run(&run.id).await.unwrap();
    assert_eq!(record.status, RunStatus::Finished);
    let history = reopened.history(&run.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].values.contains_key("leaderboard_table"));
}
