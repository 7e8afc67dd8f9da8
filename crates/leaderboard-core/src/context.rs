//! Shared per-run state: tracking handle, resolved configuration and the
//! results table every stage appends to.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use run_tracker::{
    ArtifactRecord, ArtifactSpec, RunHandle, RunId, Tracker, TrackerError, TrackerResult,
};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{keys, ConfigError, Configuration};
use crate::obs;
use crate::table::{ResultsTable, SharedTable};

/// Artifact name and type used for the configuration snapshot.
pub const CONFIG_ARTIFACT: &str = "config";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("run context has not been initialized")]
    Uninitialized,

    #[error("failed to write config artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// An open tracking run together with the backend that owns it.
///
/// Suites use this to log their own artifacts and values against the run.
#[derive(Clone, Copy)]
pub struct TrackedRun<'a> {
    handle: &'a RunHandle,
    tracker: &'a dyn Tracker,
}

impl<'a> TrackedRun<'a> {
    pub fn new(handle: &'a RunHandle, tracker: &'a dyn Tracker) -> Self {
        Self { handle, tracker }
    }

    pub fn handle(&self) -> &'a RunHandle {
        self.handle
    }

    pub fn id(&self) -> &'a RunId {
        &self.handle.id
    }

    /// Local directory of the run, when the backend keeps one.
    pub fn dir(&self) -> Option<PathBuf> {
        self.tracker.run_dir(self.handle)
    }

    /// Attach a file to the run as a new version of `artifact.name`.
    pub async fn attach_artifact(&self, artifact: ArtifactSpec) -> TrackerResult<ArtifactRecord> {
        let record = self.tracker.attach_artifact(self.handle, artifact).await?;
        obs::emit_artifact_logged(
            self.handle.id.as_str(),
            &record.name,
            record.version,
            record.digest.short(),
        );
        Ok(record)
    }

    /// Record `values` as the next history step of the run.
    pub async fn log(&self, values: Map<String, Value>) -> TrackerResult<()> {
        self.tracker.log(self.handle, values).await
    }
}

impl std::fmt::Debug for TrackedRun<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedRun")
            .field("run", &self.handle.path())
            .finish_non_exhaustive()
    }
}

/// State shared by every stage of one leaderboard run.
pub struct RunContext {
    run: Option<RunHandle>,
    tracker: Option<Arc<dyn Tracker>>,
    config: Configuration,
    table: SharedTable,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run", &self.run)
            .field("tracked", &self.tracker.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Build the context for a run.
    ///
    /// When a tracking run exists and `mtbench.model_id` is a non-empty
    /// string, `_<run id>` is appended to it so repeated evaluations of the
    /// same model do not collide.
    pub fn new(run: Option<RunHandle>, mut config: Configuration, table: SharedTable) -> Self {
        if let Some(handle) = &run {
            let suffixed = config
                .get_str(keys::MTBENCH_MODEL_ID)
                .filter(|id| !id.is_empty())
                .map(|id| format!("{id}_{}", handle.id));
            if let Some(model_id) = suffixed {
                debug!(model_id = %model_id, "Suffixing mtbench model id with run id");
                config.set(keys::MTBENCH_MODEL_ID, model_id);
            }
        }
        Self {
            run,
            tracker: None,
            config,
            table,
        }
    }

    /// Backend the run was created on.
    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn run(&self) -> Option<&RunHandle> {
        self.run.as_ref()
    }

    /// The run and its backend, when both are present.
    pub fn tracked_run(&self) -> Option<TrackedRun<'_>> {
        match (&self.run, &self.tracker) {
            (Some(handle), Some(tracker)) => Some(TrackedRun::new(handle, tracker.as_ref())),
            _ => None,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    /// Copy of the current table contents.
    pub async fn table_snapshot(&self) -> ResultsTable {
        self.table.lock().await.clone()
    }

    /// Swap in a new table, keeping the shared handle.
    pub async fn replace_table(&self, table: ResultsTable) {
        *self.table.lock().await = table;
    }
}

/// Holds the single active [`RunContext`].
///
/// Tests create their own registry with [`ContextRegistry::new`]; the binary
/// uses [`ContextRegistry::global`].
#[derive(Debug, Default)]
pub struct ContextRegistry {
    active: RwLock<Option<Arc<RunContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> Arc<ContextRegistry> {
        static GLOBAL: OnceLock<Arc<ContextRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ContextRegistry::new())))
    }

    /// Install `ctx` as the active context, replacing any previous one.
    pub fn initialize(&self, ctx: RunContext) -> Arc<RunContext> {
        let ctx = Arc::new(ctx);
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            debug!("Replacing previously initialized run context");
        }
        *active = Some(Arc::clone(&ctx));
        ctx
    }

    /// The active context.
    pub fn instance(&self) -> ContextResult<Arc<RunContext>> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ContextError::Uninitialized)
    }

    /// Drop the active context.
    pub fn clear(&self) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Attach the configuration as a `config` artifact of the active run.
///
/// Does nothing unless `wandb.log` is true and a run exists. The original
/// file is uploaded when present; otherwise the in-memory configuration is
/// written as YAML to `config_path` first.
pub async fn log_config_artifact(
    tracker: &dyn Tracker,
    ctx: &RunContext,
    config_path: &Path,
) -> ContextResult<Option<ArtifactRecord>> {
    let Some(run) = ctx.run() else {
        return Ok(None);
    };
    if !ctx.config().logging_enabled() {
        debug!(run_id = %run.id, "Logging disabled, skipping config artifact");
        return Ok(None);
    }

    if !config_path.exists() {
        let yaml = ctx.config().to_yaml()?;
        write_config(config_path, &yaml).map_err(|source| ContextError::ArtifactWrite {
            path: config_path.to_path_buf(),
            source,
        })?;
        info!(path = %config_path.display(), "Wrote resolved config for artifact upload");
    }

    let record = tracker
        .attach_artifact(
            run,
            ArtifactSpec::new(CONFIG_ARTIFACT, CONFIG_ARTIFACT, config_path),
        )
        .await?;
    obs::emit_artifact_logged(run.id.as_str(), &record.name, record.version, record.digest.short());
    Ok(Some(record))
}

fn write_config(path: &Path, yaml: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, yaml)
}
