//! In-memory fakes for the tracker trait (testing only)
//!
//! `MemoryTracker` satisfies the [`Tracker`] contract without touching the
//! filesystem beyond reading artifact source files.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::TrackerError;
use crate::tracker::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    artifacts: Vec<(ArtifactRecord, Vec<u8>)>,
    history: Vec<HistoryEntry>,
}

impl RunState {
    fn ensure_running(&self) -> TrackerResult<()> {
        if self.record.status != RunStatus::Running {
            return Err(TrackerError::InvalidRunState {
                run_id: self.record.handle.id.0.clone(),
                status: format!("{:?}", self.record.status),
                expected: "Running".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory tracker backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored for an artifact version, if present.
    pub fn artifact_bytes(&self, run_id: &RunId, name: &str, version: u32) -> Option<Vec<u8>> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0).and_then(|state| {
            state
                .artifacts
                .iter()
                .find(|(record, _)| record.name == name && record.version == version)
                .map(|(_, bytes)| bytes.clone())
        })
    }

    /// Number of runs ever created.
    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn create_run(&self, spec: RunSpec) -> TrackerResult<RunHandle> {
        let handle = RunHandle {
            id: RunId::new(),
            entity: spec.entity,
            project: spec.project,
            name: spec.name,
        };
        let record = RunRecord {
            handle: handle.clone(),
            job_type: spec.job_type,
            config: spec.config,
            status: RunStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
        };
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            handle.id.0.clone(),
            RunState {
                record,
                artifacts: Vec::new(),
                history: Vec::new(),
            },
        );
        Ok(handle)
    }

    async fn attach_artifact(
        &self,
        run: &RunHandle,
        artifact: ArtifactSpec,
    ) -> TrackerResult<ArtifactRecord> {
        if !artifact.path.is_file() {
            return Err(TrackerError::ArtifactMissing {
                path: artifact.path,
            });
        }
        let bytes = std::fs::read(&artifact.path)?;

        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run.id.0)
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run.id.0.clone(),
            })?;
        state.ensure_running()?;

        let version = state
            .artifacts
            .iter()
            .filter(|(record, _)| record.name == artifact.name)
            .count() as u32;
        let record = ArtifactRecord {
            name: artifact.name,
            kind: artifact.kind,
            version,
            file_name: artifact_file_name(&artifact.path),
            digest: ContentDigest::from_bytes(&bytes),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        state.artifacts.push((record.clone(), bytes));
        Ok(record)
    }

    async fn log(&self, run: &RunHandle, values: Map<String, Value>) -> TrackerResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run.id.0)
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run.id.0.clone(),
            })?;
        state.ensure_running()?;
        let step = state.history.len() as u64;
        state.history.push(HistoryEntry {
            step,
            values,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn finish(&self, run: &RunHandle) -> TrackerResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run.id.0)
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run.id.0.clone(),
            })?;
        state.ensure_running()?;
        state.record.status = RunStatus::Finished;
        state.record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> TrackerResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn artifacts(&self, run_id: &RunId) -> TrackerResult<Vec<ArtifactRecord>> {
        let runs = self.runs.lock().unwrap();
        let state = runs
            .get(&run_id.0)
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        Ok(state.artifacts.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn history(&self, run_id: &RunId) -> TrackerResult<Vec<HistoryEntry>> {
        let runs = self.runs.lock().unwrap();
        let state = runs
            .get(&run_id.0)
            .ok_or_else(|| TrackerError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        Ok(state.history.clone())
    }
}
