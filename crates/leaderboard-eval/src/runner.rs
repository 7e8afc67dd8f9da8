//! Stage execution with credential checks and guaranteed reclamation.

use std::sync::Arc;
use std::time::Instant;

use leaderboard_core::reclaim::{DeviceMemoryReclaimer, Reclaimer};
use leaderboard_core::{obs, RunContext};
use tracing::{debug, warn};

use crate::error::StageError;
use crate::stage::Suite;
use crate::suite::EvaluationSuite;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Result of a completed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub suite: Suite,

    /// Table rows before the stage ran.
    pub rows_before: usize,

    /// Table rows after the stage's output was written back.
    pub rows_after: usize,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    pub fn rows_added(&self) -> usize {
        self.rows_after.saturating_sub(self.rows_before)
    }
}

/// Runs one suite against the shared run context.
pub struct StageRunner {
    reclaimer: Arc<dyn Reclaimer>,
    env: EnvLookup,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new(Arc::new(DeviceMemoryReclaimer::default()))
    }
}

impl StageRunner {
    /// Runner reading credentials from the process environment.
    pub fn new(reclaimer: Arc<dyn Reclaimer>) -> Self {
        Self {
            reclaimer,
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup used by the credential guard.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(lookup);
        self
    }

    /// Fail if any variable the suite needs is unset or empty.
    pub fn check_credentials(&self, suite: Suite) -> Result<(), StageError> {
        for var in suite.required_env() {
            let present = (self.env)(*var).is_some_and(|value| !value.is_empty());
            if !present {
                return Err(StageError::MissingCredential {
                    suite,
                    var: var.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Execute `suite` and write its table back into the context.
    ///
    /// The reclaimer runs after every attempt, including failed ones. Suite
    /// failures are returned as-is and never retried.
    pub async fn run_stage(
        &self,
        suite: Suite,
        implementation: &dyn EvaluationSuite,
        ctx: &RunContext,
    ) -> Result<StageResult, StageError> {
        let run_id = obs::display_run_id(ctx.run().map(|r| r.id.as_str())).to_string();
        obs::emit_stage_started(&run_id, suite.name());
        let start = Instant::now();

        let outcome = self.attempt(suite, implementation, ctx).await;
        self.reclaimer.reclaim();

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok((rows_before, rows_after)) => {
                obs::emit_stage_finished(&run_id, suite.name(), duration_ms, rows_after, true);
                Ok(StageResult {
                    suite,
                    rows_before,
                    rows_after,
                    duration_ms,
                })
            }
            Err(e) => {
                obs::emit_stage_finished(&run_id, suite.name(), duration_ms, 0, false);
                warn!(suite = %suite, error = %e, "Stage failed");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        suite: Suite,
        implementation: &dyn EvaluationSuite,
        ctx: &RunContext,
    ) -> Result<(usize, usize), StageError> {
        self.check_credentials(suite)?;

        let table = ctx.table_snapshot().await;
        let rows_before = table.len();
        debug!(suite = %suite, rows_before, "Invoking suite");

        let table = implementation
            .evaluate(ctx.tracked_run(), ctx.config(), table)
            .await
            .map_err(|source| StageError::Suite { suite, source })?;
        let rows_after = table.len();
        ctx.replace_table(table).await;
        Ok((rows_before, rows_after))
    }
}
