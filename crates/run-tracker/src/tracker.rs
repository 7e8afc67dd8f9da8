//! Tracking backend abstractions
//!
//! The [`Tracker`] trait is the only surface the orchestrator uses:
//! - `create_run`: open a tracking run for an entity/project
//! - `attach_artifact`: upload a versioned file to the run
//! - `log`: record a mapping of named values as one history step
//! - `finish`: close the run
//!
//! Read-side methods (`get_run`, `artifacts`, `history`) exist for
//! inspection and contract tests. In-memory fakes live in [`crate::fakes`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::error::TrackerError;

/// Result type for tracker operations
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always valid lowercase hex
/// produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = TrackerError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TrackerError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Identifier of a tracking run (8 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        RunId(raw[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for opening a tracking run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub entity: String,
    pub project: String,
    /// Display name of the run
    pub name: String,
    /// Job type label (e.g. "evaluation")
    pub job_type: Option<String>,
    /// Full configuration snapshot stored with the run
    pub config: Value,
}

/// Handle to an open tracking run.
///
/// Cheap to clone; every tracker operation takes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: RunId,
    pub entity: String,
    pub project: String,
    pub name: String,
}

impl RunHandle {
    /// `entity/project/id` path used for display.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.entity, self.project, self.id)
    }
}

/// Status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Finished,
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub handle: RunHandle,
    pub job_type: Option<String>,
    pub config: Value,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Artifacts & history
// ---------------------------------------------------------------------------

/// Request to attach a file to a run as a named artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name (e.g. "config")
    pub name: String,
    /// Artifact type (e.g. "config", "dataset")
    pub kind: String,
    /// File to upload
    pub path: PathBuf,
}

impl ArtifactSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Stored artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub kind: String,
    /// Zero-based version within the run (`v0`, `v1`, ...)
    pub version: u32,
    /// Base name of the uploaded file
    pub file_name: String,
    pub digest: ContentDigest,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// One `log` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic step within the run, starting at 0
    pub step: u64,
    pub values: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Derive the stored file name of an artifact source path.
pub(crate) fn artifact_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string())
}

/// Experiment-tracking backend.
///
/// Guarantees:
/// - A run transitions Running → Finished (terminal).
/// - `attach_artifact` and `log` fail on a finished run.
/// - History steps are assigned in call order.
/// - Artifact versions for a given name increase by one per attach.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Open a new run.
    async fn create_run(&self, spec: RunSpec) -> TrackerResult<RunHandle>;

    /// Upload `artifact.path` as a new version of `artifact.name`.
    async fn attach_artifact(
        &self,
        run: &RunHandle,
        artifact: ArtifactSpec,
    ) -> TrackerResult<ArtifactRecord>;

    /// Record a mapping of named values as the next history step.
    async fn log(&self, run: &RunHandle, values: Map<String, Value>) -> TrackerResult<()>;

    /// Close the run.
    async fn finish(&self, run: &RunHandle) -> TrackerResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> TrackerResult<RunRecord>;

    /// All artifact versions attached to a run, in attach order.
    async fn artifacts(&self, run_id: &RunId) -> TrackerResult<Vec<ArtifactRecord>>;

    /// All logged history steps, ordered by step.
    async fn history(&self, run_id: &RunId) -> TrackerResult<Vec<HistoryEntry>>;

    /// Local directory holding the run's files, for backends that have one.
    fn run_dir(&self, _run: &RunHandle) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_short_hex() {
        let id = RunId::new();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, RunId::new());
    }

    #[test]
    fn test_digest_try_from_rejects_garbage() {
        assert!(ContentDigest::try_from("xyz".to_string()).is_err());
        let good = ContentDigest::from_bytes(b"abc");
        let parsed = ContentDigest::try_from(good.as_str().to_uppercase()).unwrap();
        assert_eq!(parsed, good);
    }

    #[test]
    fn test_run_handle_path() {
        let handle = RunHandle {
            id: RunId("0123abcd".to_string()),
            entity: "team".to_string(),
            project: "leaderboard".to_string(),
            name: "run".to_string(),
        };
        assert_eq!(handle.path(), "team/leaderboard/0123abcd");
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name(Path::new("configs/config.yaml")),
            "config.yaml"
        );
        assert_eq!(artifact_file_name(Path::new("/")), "artifact");
    }
}
