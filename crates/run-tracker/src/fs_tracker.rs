//! Filesystem-backed [`Tracker`] implementation
//!
//! Layout:
//!
//! ```text
//! <root>/<entity>/<project>/<run-id>/
//!     run.json                          RunRecord
//!     history.jsonl                     one HistoryEntry per line
//!     artifacts.jsonl                   one ArtifactRecord per line, attach order
//!     artifacts/<name>/v<N>/<file>      uploaded bytes
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::TrackerError;
use crate::tracker::*;

const RUN_FILE: &str = "run.json";
const HISTORY_FILE: &str = "history.jsonl";
const ARTIFACT_INDEX_FILE: &str = "artifacts.jsonl";

/// Directory-backed tracking backend.
pub struct FsTracker {
    root: PathBuf,
}

impl FsTracker {
    /// Create a tracker rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> TrackerResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "FsTracker ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn handle_dir(&self, run: &RunHandle) -> PathBuf {
        self.root
            .join(sanitize_component(&run.entity))
            .join(sanitize_component(&run.project))
            .join(run.id.as_str())
    }

    /// Locate a run directory by ID alone (`<root>/*/*/<id>`).
    fn find_run_dir(&self, run_id: &RunId) -> TrackerResult<PathBuf> {
        for entity in read_subdirs(&self.root)? {
            for project in read_subdirs(&entity)? {
                let candidate = project.join(run_id.as_str());
                if candidate.join(RUN_FILE).is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(TrackerError::RunNotFound {
            run_id: run_id.0.clone(),
        })
    }

    /// Resolve the directory of an open run, failing if it was finished.
    fn running_dir(&self, run: &RunHandle) -> TrackerResult<(PathBuf, RunRecord)> {
        let dir = self.handle_dir(run);
        let run_file = dir.join(RUN_FILE);
        if !run_file.is_file() {
            return Err(TrackerError::RunNotFound {
                run_id: run.id.0.clone(),
            });
        }
        let record: RunRecord = serde_json::from_slice(&fs::read(&run_file)?)?;
        if record.status != RunStatus::Running {
            return Err(TrackerError::InvalidRunState {
                run_id: run.id.0.clone(),
                status: format!("{:?}", record.status),
                expected: "Running".to_string(),
            });
        }
        Ok((dir, record))
    }
}

#[async_trait]
impl Tracker for FsTracker {
    async fn create_run(&self, spec: RunSpec) -> TrackerResult<RunHandle> {
        let handle = RunHandle {
            id: RunId::new(),
            entity: spec.entity,
            project: spec.project,
            name: spec.name,
        };
        let dir = self.handle_dir(&handle);
        fs::create_dir_all(dir.join("artifacts"))?;

        let record = RunRecord {
            handle: handle.clone(),
            job_type: spec.job_type,
            config: spec.config,
            status: RunStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
        };
        write_atomic(&dir.join(RUN_FILE), &serde_json::to_vec_pretty(&record)?)?;

        debug!(run = %handle.path(), name = %handle.name, "Created tracking run");
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
        let (dir, _) = self.running_dir(run)?;
        let bytes = fs::read(&artifact.path)?;

        let index_path = dir.join(ARTIFACT_INDEX_FILE);
        let existing: Vec<ArtifactRecord> = read_jsonl(&index_path)?;
        let version = existing.iter().filter(|r| r.name == artifact.name).count() as u32;

        let file_name = artifact_file_name(&artifact.path);
        let version_dir = dir
            .join("artifacts")
            .join(sanitize_component(&artifact.name))
            .join(format!("v{version}"));
        fs::create_dir_all(&version_dir)?;
        write_atomic(&version_dir.join(&file_name), &bytes)?;

        let record = ArtifactRecord {
            name: artifact.name,
            kind: artifact.kind,
            version,
            file_name,
            digest: ContentDigest::from_bytes(&bytes),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        append_jsonl(&index_path, &record)?;

        debug!(
            run = %run.path(),
            artifact = %record.name,
            version = record.version,
            digest = %record.digest.short(),
            "Attached artifact"
        );
        Ok(record)
    }

    async fn log(&self, run: &RunHandle, values: Map<String, Value>) -> TrackerResult<()> {
        let (dir, _) = self.running_dir(run)?;
        let history_path = dir.join(HISTORY_FILE);
        let step = read_jsonl::<HistoryEntry>(&history_path)?.len() as u64;
        let entry = HistoryEntry {
            step,
            values,
            timestamp: Utc::now(),
        };
        append_jsonl(&history_path, &entry)
    }

    async fn finish(&self, run: &RunHandle) -> TrackerResult<()> {
        let (dir, mut record) = self.running_dir(run)?;
        record.status = RunStatus::Finished;
        record.finished_at = Some(Utc::now());
        write_atomic(&dir.join(RUN_FILE), &serde_json::to_vec_pretty(&record)?)?;
        info!(run = %run.path(), "Tracking run finished");
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> TrackerResult<RunRecord> {
        let dir = self.find_run_dir(run_id)?;
        Ok(serde_json::from_slice(&fs::read(dir.join(RUN_FILE))?)?)
    }

    async fn artifacts(&self, run_id: &RunId) -> TrackerResult<Vec<ArtifactRecord>> {
        let dir = self.find_run_dir(run_id)?;
        read_jsonl(&dir.join(ARTIFACT_INDEX_FILE))
    }

    async fn history(&self, run_id: &RunId) -> TrackerResult<Vec<HistoryEntry>> {
        let dir = self.find_run_dir(run_id)?;
        let mut entries: Vec<HistoryEntry> = read_jsonl(&dir.join(HISTORY_FILE))?;
        entries.sort_by_key(|e| e.step);
        Ok(entries)
    }

    fn run_dir(&self, run: &RunHandle) -> Option<PathBuf> {
        Some(self.handle_dir(run))
    }
}

/// Turn a name into a single path component that stays below its parent.
///
/// Separators become `_`. Empty names and names made only of dots (`.`, `..`)
/// get a leading `_` so they cannot refer to the current or parent directory.
fn sanitize_component(name: &str) -> String {
    let cleaned = name.replace(['/', '\\', '\0'], "_");
    if cleaned.chars().all(|c| c == '.') {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

fn read_subdirs(dir: &Path) -> TrackerResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// Atomic write: temp file in the same directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> TrackerResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> TrackerResult<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> TrackerResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }
    Ok(items)
}
