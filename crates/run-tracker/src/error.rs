//! Error types for run-tracker

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a tracking backend
#[derive(Error, Debug)]
pub enum TrackerError {
    /// No run with this ID is known to the backend
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Operation requires a different run status
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Artifact source file does not exist
    #[error("artifact file not found: {}", path.display())]
    ArtifactMissing { path: PathBuf },

    /// Malformed content digest
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_run_state_display() {
        let err = TrackerError::InvalidRunState {
            run_id: "ab12cd34".to_string(),
            status: "Finished".to_string(),
            expected: "Running".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ab12cd34"));
        assert!(msg.contains("expected Running"));
    }

    #[test]
    fn test_artifact_missing_display() {
        let err = TrackerError::ArtifactMissing {
            path: PathBuf::from("configs/config.yaml"),
        };
        assert!(err.to_string().contains("configs/config.yaml"));
    }
}
