//! Error types for stage execution and orchestration.

use leaderboard_core::{ConfigError, ContextError};
use run_tracker::TrackerError;

use crate::stage::Suite;

/// Errors raised while running a single stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{suite} requires environment variable {var} to be set")]
    MissingCredential { suite: Suite, var: String },

    #[error("{suite} evaluation failed: {source:#}")]
    Suite {
        suite: Suite,
        #[source]
        source: anyhow::Error,
    },

    #[error("no implementation registered for suite {0}")]
    Unregistered(Suite),
}

impl StageError {
    pub fn suite(&self) -> Suite {
        match self {
            StageError::MissingCredential { suite, .. } | StageError::Suite { suite, .. } => *suite,
            StageError::Unregistered(suite) => *suite,
        }
    }
}

/// Anything that aborts a leaderboard run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("tracking backend error: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl OrchestratorError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }

    pub fn is_missing_credential(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Stage(StageError::MissingCredential { .. })
        )
    }
}
