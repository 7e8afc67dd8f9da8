//! Leaderboard Core Library
//!
//! Shared building blocks of a leaderboard run: configuration resolution,
//! the results table, the run context and its registry, device memory
//! reclamation, and tracing setup.

pub mod config;
pub mod context;
pub mod obs;
pub mod reclaim;
pub mod table;
pub mod telemetry;

pub use config::{
    apply_overrides, derive_run_name, keys, BaseConfig, ConfigError, ConfigResolver,
    ConfigResult, Configuration, OverrideFacts, OverrideRule, WandbSettings,
};
pub use context::{
    log_config_artifact, ContextError, ContextRegistry, RunContext, TrackedRun,
};
pub use obs::{
    emit_artifact_logged, emit_reclaimed, emit_run_published, emit_run_started,
    emit_stage_finished, emit_stage_started, RunSpan,
};
pub use reclaim::{
    DeviceMemoryReclaimer, DeviceResident, DeviceRuntime, NoDevice, ReclaimStats, Reclaimer,
};
pub use table::{ResultsTable, SharedTable, TableError};
pub use telemetry::init_tracing;
