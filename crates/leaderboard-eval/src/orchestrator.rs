//! Top-level control flow of a leaderboard run.
//!
//! Phases advance strictly in order:
//! `Parsed → Configured → ContextReady → StageDone(suite)* → Finalized`.
//! Any error aborts the run before finalization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use leaderboard_core::config::{keys, ConfigResolver};
use leaderboard_core::{log_config_artifact, obs, ContextRegistry, ResultsTable, RunContext};
use run_tracker::{RunHandle, RunId, RunSpec, Tracker};
use serde_json::{Map, Value};
use tracing::{info, warn, Instrument};

use crate::error::{OrchestratorError, StageError};
use crate::runner::{StageResult, StageRunner};
use crate::stage::{Selection, Suite};
use crate::suite::SuiteRegistry;

/// Job type recorded on every tracking run.
pub const JOB_TYPE: &str = "evaluation";

/// Key the final table is logged under.
pub const TABLE_KEY: &str = "leaderboard_table";

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_path: PathBuf,
    pub model: Option<String>,
    pub selection: Selection,
}

impl Invocation {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            model: None,
            selection: Selection::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

/// Orchestration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsed,
    Configured,
    ContextReady,
    StageDone(Suite),
    Finalized,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Option<RunId>,
    pub run_name: String,
    pub stages: Vec<StageResult>,
    /// Whether the table was logged to the tracking run.
    pub published: bool,
    pub phases: Vec<Phase>,
    pub table: ResultsTable,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn executed(&self) -> Vec<Suite> {
        self.stages.iter().map(|s| s.suite).collect()
    }
}

/// Drives configuration, stages and publication for one run.
pub struct Orchestrator {
    resolver: ConfigResolver,
    tracker: Option<Arc<dyn Tracker>>,
    suites: SuiteRegistry,
    runner: StageRunner,
    registry: Arc<ContextRegistry>,
}

impl Orchestrator {
    /// Orchestrator without a tracking backend, using the global context registry.
    pub fn new(suites: SuiteRegistry) -> Self {
        Self {
            resolver: ConfigResolver::default(),
            tracker: None,
            suites,
            runner: StageRunner::default(),
            registry: ContextRegistry::global(),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_resolver(mut self, resolver: ConfigResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_runner(mut self, runner: StageRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ContextRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Execute a full run.
    pub async fn run(&self, invocation: &Invocation) -> Result<RunReport, OrchestratorError> {
        let span = obs::RunSpan::new();
        self.execute(invocation, &span)
            .instrument(span.span().clone())
            .await
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        span: &obs::RunSpan,
    ) -> Result<RunReport, OrchestratorError> {
        let start = Instant::now();
        let mut phases = vec![Phase::Parsed];

        let mut config = self
            .resolver
            .resolve(&invocation.config_path, invocation.model.as_deref())?;

        let selection = invocation.selection;
        if selection.is_conflicting() {
            warn!("Both --llm-jp-eval-only and --mtbench-only given; running both suites");
        }
        let plan = selection.plan();
        if let Some(suite) = selection.single_stage() {
            let run_name = format!("{}{}", config.wandb().run_name, suite.run_name_suffix());
            info!(run_name = %run_name, suite = %suite, "Single-suite run");
            config.set(keys::WANDB_RUN_NAME, run_name);
        }
        let run_name = config.wandb().run_name;
        span.record_run_name(&run_name);
        phases.push(Phase::Configured);

        let run = match &self.tracker {
            Some(tracker) => Some(self.create_run(tracker.as_ref(), &config).await?),
            None => None,
        };
        if let Some(run) = &run {
            span.record_run_id(run.id.as_str());
        }

        let mut ctx = RunContext::new(run, config, ResultsTable::new().into_shared());
        if let Some(tracker) = &self.tracker {
            ctx = ctx.with_tracker(Arc::clone(tracker));
        }
        let ctx = self.registry.initialize(ctx);
        if let Some(tracker) = &self.tracker {
            log_config_artifact(tracker.as_ref(), &ctx, &invocation.config_path).await?;
        }
        phases.push(Phase::ContextReady);

        let run_id = obs::display_run_id(ctx.run().map(|r| r.id.as_str())).to_string();
        let stage_names: Vec<&str> = plan.iter().map(Suite::name).collect();
        obs::emit_run_started(&run_id, &run_name, &stage_names);

        let mut stages = Vec::with_capacity(plan.len());
        for suite in plan {
            let implementation = self
                .suites
                .get(suite)
                .ok_or(StageError::Unregistered(suite))?;
            let result = self
                .runner
                .run_stage(suite, implementation.as_ref(), &ctx)
                .await?;
            stages.push(result);
            phases.push(Phase::StageDone(suite));
        }

        let table = ctx.table_snapshot().await;
        let published = self.finalize(&ctx, &table).await?;
        phases.push(Phase::Finalized);

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            stages = stages.len(),
            rows = table.len(),
            published,
            duration_ms,
            "Leaderboard run complete"
        );

        Ok(RunReport {
            run_id: ctx.run().map(|r| r.id.clone()),
            run_name,
            stages,
            published,
            phases,
            table,
            duration_ms,
        })
    }

    async fn create_run(
        &self,
        tracker: &dyn Tracker,
        config: &leaderboard_core::Configuration,
    ) -> Result<RunHandle, OrchestratorError> {
        let wandb = config.wandb();
        let handle = tracker
            .create_run(RunSpec {
                entity: wandb.entity,
                project: wandb.project,
                name: wandb.run_name,
                job_type: Some(JOB_TYPE.to_string()),
                config: config.to_value(),
            })
            .await?;
        info!(run_id = %handle.id, path = %handle.path(), "Created tracking run");
        Ok(handle)
    }

    /// Publish the table when logging is enabled, then close the tracking run.
    async fn finalize(&self, ctx: &RunContext, table: &ResultsTable) -> Result<bool, OrchestratorError> {
        let (Some(tracker), Some(run)) = (&self.tracker, ctx.run()) else {
            return Ok(false);
        };

        let publish = ctx.config().logging_enabled();
        if publish {
            let mut values = Map::new();
            values.insert(TABLE_KEY.to_string(), table.to_value());
            tracker.log(run, values).await?;
            obs::emit_run_published(run.id.as_str(), table.len(), table.columns().len());
        } else {
            info!(run_id = %run.id, "Logging disabled, results not published");
        }
        tracker.finish(run).await?;
        Ok(publish)
    }
}

/// Table logged to a run's history, if any.
pub fn published_table(values: &Map<String, Value>) -> Option<ResultsTable> {
    values
        .get(TABLE_KEY)
        .cloned()
        .and_then(|v| ResultsTable::from_value(v).ok())
}
