//! Structured lifecycle events for leaderboard runs.
//!
//! Every event carries an `event` field (`run.started`, `stage.started`,
//! `stage.finished`, `reclaim.done`, `artifact.logged`, `run.published`) so
//! JSON logs can be filtered without parsing messages.

use tracing::{info, warn};

/// The `leaderboard.run` span.
///
/// Name and id are only known once the configuration is resolved and the
/// tracking run exists, so both start empty and are recorded later.
///
/// ```ignore
/// let span = RunSpan::new();
/// orchestrate(&span).instrument(span.span().clone()).await;
/// ```
#[derive(Debug, Clone)]
pub struct RunSpan {
    span: tracing::Span,
}

impl Default for RunSpan {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSpan {
    pub fn new() -> Self {
        let span = tracing::info_span!(
            "leaderboard.run",
            run_name = tracing::field::Empty,
            run_id = tracing::field::Empty,
        );
        Self { span }
    }

    pub fn record_run_name(&self, run_name: &str) {
        self.span.record("run_name", run_name);
    }

    pub fn record_run_id(&self, run_id: &str) {
        self.span.record("run_id", run_id);
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Run id as printed in events; untracked runs show `-`.
pub fn display_run_id(run_id: Option<&str>) -> &str {
    run_id.unwrap_or("-")
}

pub fn emit_run_started(run_id: &str, run_name: &str, stages: &[&str]) {
    info!(
        event = "run.started",
        run_id = %run_id,
        run_name = %run_name,
        stages = ?stages,
    );
}

pub fn emit_stage_started(run_id: &str, stage: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

/// Stage completed (`success = false` is logged at warn).
pub fn emit_stage_finished(run_id: &str, stage: &str, duration_ms: u64, rows: usize, success: bool) {
    if success {
        info!(
            event = "stage.finished",
            run_id = %run_id,
            stage = %stage,
            duration_ms = duration_ms,
            rows = rows,
            success = true,
        );
    } else {
        warn!(
            event = "stage.finished",
            run_id = %run_id,
            stage = %stage,
            duration_ms = duration_ms,
            rows = rows,
            success = false,
        );
    }
}

pub fn emit_reclaimed(runtime: &str, dropped: usize, released_bytes: u64) {
    info!(
        event = "reclaim.done",
        runtime = %runtime,
        dropped = dropped,
        released_bytes = released_bytes,
    );
}

pub fn emit_artifact_logged(run_id: &str, name: &str, version: u32, digest: &str) {
    info!(
        event = "artifact.logged",
        run_id = %run_id,
        artifact = %name,
        version = version,
        digest = %digest,
    );
}

pub fn emit_run_published(run_id: &str, rows: usize, columns: usize) {
    info!(
        event = "run.published",
        run_id = %run_id,
        rows = rows,
        columns = columns,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = RunSpan::new();
        span.record_run_name("name");
        span.record_run_id("test-run-id");
        let _entered = span.span().enter();
    }

    #[test]
    fn test_display_run_id() {
        assert_eq!(display_run_id(None), "-");
        assert_eq!(display_run_id(Some("abc")), "abc");
    }
}
