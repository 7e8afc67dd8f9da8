//! The evaluation-suite boundary and its external-command implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use async_trait::async_trait;
use leaderboard_core::{Configuration, ResultsTable, TrackedRun};
use run_tracker::ArtifactSpec;
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::stage::Suite;

/// Environment variables handed to an external suite process.
pub mod env {
    pub const CONFIG: &str = "LEADERBOARD_CONFIG";
    pub const TABLE_IN: &str = "LEADERBOARD_TABLE_IN";
    pub const TABLE_OUT: &str = "LEADERBOARD_TABLE_OUT";
    pub const RUN_ID: &str = "LEADERBOARD_RUN_ID";
    pub const RUN_DIR: &str = "LEADERBOARD_RUN_DIR";
    pub const ARTIFACTS_DIR: &str = "LEADERBOARD_ARTIFACTS_DIR";
    pub const SUITE: &str = "LEADERBOARD_SUITE";
}

/// One evaluation suite.
///
/// Receives the current table and returns the table to keep. Scoring is
/// entirely up to the implementation. When a tracking run exists the suite
/// gets it and may attach its own artifacts or log values against it.
#[async_trait]
pub trait EvaluationSuite: Send + Sync {
    async fn evaluate(
        &self,
        run: Option<TrackedRun<'_>>,
        config: &Configuration,
        table: ResultsTable,
    ) -> anyhow::Result<ResultsTable>;
}

/// Runs a suite as a child process configured under `suites.<suite>`.
///
/// ```yaml
/// suites:
///   mtbench:
///     command: ["python", "scripts/mtbench_eval.py"]
///     env:
///       CUDA_VISIBLE_DEVICES: "0"
/// ```
///
/// The child reads the resolved configuration from `LEADERBOARD_CONFIG`
/// and writes the rows it produced as table JSON to `LEADERBOARD_TABLE_OUT`.
/// Files it leaves in `LEADERBOARD_ARTIFACTS_DIR` are attached to the
/// tracking run, named after their file stem. `LEADERBOARD_RUN_ID` and
/// `LEADERBOARD_RUN_DIR` are set when the run exists and the backend keeps
/// a local directory.
#[derive(Debug, Clone)]
pub struct CommandSuite {
    suite: Suite,
    workdir: Option<PathBuf>,
}

impl CommandSuite {
    pub fn new(suite: Suite) -> Self {
        Self {
            suite,
            workdir: None,
        }
    }

    /// Run the child in `dir` instead of the current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Argument vector from `suites.<suite>.command`.
    ///
    /// A plain string is split on whitespace.
    pub fn command(&self, config: &Configuration) -> anyhow::Result<Vec<String>> {
        let key = format!("suites.{}.command", self.suite.config_key());
        let argv: Vec<String> = match config.get(&key) {
            None | Some(Value::Null) => bail!("{} is not configured ({key} is missing)", self.suite),
            Some(Value::String(line)) => line.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(_) | Value::Bool(_) => Ok(item.to_string()),
                    other => bail!("{key} contains a non-scalar argument: {other}"),
                })
                .collect::<anyhow::Result<_>>()?,
            Some(other) => bail!("{key} must be a list or a string, found {other}"),
        };
        if argv.is_empty() {
            bail!("{key} is empty");
        }
        Ok(argv)
    }

    /// Extra environment from `suites.<suite>.env`.
    pub fn extra_env(&self, config: &Configuration) -> Vec<(String, String)> {
        let key = format!("suites.{}.env", self.suite.config_key());
        config
            .get(&key)
            .and_then(Value::as_object)
            .map(|vars| {
                vars.iter()
                    .map(|(name, value)| {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvaluationSuite for CommandSuite {
    async fn evaluate(
        &self,
        run: Option<TrackedRun<'_>>,
        config: &Configuration,
        table: ResultsTable,
    ) -> anyhow::Result<ResultsTable> {
        let argv = self.command(config)?;
        let scratch = tempfile::TempDir::new().context("failed to create suite scratch dir")?;
        let config_file = scratch.path().join("config.yaml");
        let table_in = scratch.path().join("table_in.json");
        let table_out = scratch.path().join("table_out.json");
        let artifacts_dir = scratch.path().join("artifacts");

        fs::write(&config_file, config.to_yaml()?)
            .await
            .with_context(|| format!("failed to write {}", config_file.display()))?;
        fs::write(&table_in, serde_json::to_vec(&table.to_value())?)
            .await
            .with_context(|| format!("failed to write {}", table_in.display()))?;
        fs::create_dir_all(&artifacts_dir)
            .await
            .with_context(|| format!("failed to create {}", artifacts_dir.display()))?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(self.extra_env(config))
            .env(env::CONFIG, &config_file)
            .env(env::TABLE_IN, &table_in)
            .env(env::TABLE_OUT, &table_out)
            .env(env::ARTIFACTS_DIR, &artifacts_dir)
            .env(env::SUITE, self.suite.name())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(run) = &run {
            command.env(env::RUN_ID, run.id().as_str());
            if let Some(dir) = run.dir() {
                command.env(env::RUN_DIR, dir);
            }
        }
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        info!(suite = %self.suite, command = ?argv, "Spawning suite process");
        let start = Instant::now();
        let output = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", argv[0]))?
            .wait_with_output()
            .await?;
        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(suite = %self.suite, duration_ms, stdout = %stdout, stderr = %stderr, "Suite process exited");

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            bail!(
                "{} exited with code {code}: {}",
                argv[0],
                tail(&stderr, 20)
            );
        }

        let produced = fs::read(&table_out).await.with_context(|| {
            format!("{} did not write a results table to {}", argv[0], table_out.display())
        })?;
        let produced: Value = serde_json::from_slice(&produced)
            .with_context(|| format!("{} wrote invalid table JSON", argv[0]))?;
        let produced = ResultsTable::from_value(produced)?;

        self.attach_outputs(run, &artifacts_dir).await?;

        let mut table = table;
        table.merge(&produced);
        Ok(table)
    }
}

impl CommandSuite {
    /// Attach every file the child left in `dir`, in file-name order.
    async fn attach_outputs(&self, run: Option<TrackedRun<'_>>, dir: &Path) -> anyhow::Result<usize> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        if files.is_empty() {
            return Ok(0);
        }
        let Some(run) = run else {
            debug!(suite = %self.suite, files = files.len(), "No tracking run, suite artifacts discarded");
            return Ok(0);
        };

        files.sort();
        for path in &files {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| self.suite.name().to_string());
            run.attach_artifact(ArtifactSpec::new(name, self.suite.name(), path))
                .await
                .with_context(|| format!("failed to attach {}", path.display()))?;
        }
        Ok(files.len())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Suite implementations by identity.
#[derive(Default, Clone)]
pub struct SuiteRegistry {
    suites: HashMap<Suite, Arc<dyn EvaluationSuite>>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`CommandSuite`] for every suite.
    pub fn with_command_suites() -> Self {
        let mut registry = Self::new();
        for suite in Suite::ORDER {
            registry.register(suite, Arc::new(CommandSuite::new(suite)));
        }
        registry
    }

    /// Register `implementation`, replacing any previous one for `suite`.
    pub fn register(&mut self, suite: Suite, implementation: Arc<dyn EvaluationSuite>) -> &mut Self {
        self.suites.insert(suite, implementation);
        self
    }

    pub fn get(&self, suite: Suite) -> Option<Arc<dyn EvaluationSuite>> {
        self.suites.get(&suite).cloned()
    }

    pub fn contains(&self, suite: Suite) -> bool {
        self.suites.contains_key(&suite)
    }
}

impl std::fmt::Debug for SuiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.suites.keys().map(Suite::name).collect();
        registered.sort_unstable();
        f.debug_struct("SuiteRegistry")
            .field("suites", &registered)
            .finish()
    }
}
