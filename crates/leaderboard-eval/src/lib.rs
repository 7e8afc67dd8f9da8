//! Leaderboard Eval - staged evaluation of a model
//!
//! Sequences the evaluation suites of a leaderboard run:
//! - Resolves the configuration and creates the tracking run
//! - Runs llm-jp-eval and/or MT-Bench against the shared results table
//! - Reclaims device memory after every stage
//! - Publishes the final table when logging is enabled

pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod stage;
pub mod suite;

// Re-export key types
pub use error::{OrchestratorError, StageError};
pub use orchestrator::{Invocation, Orchestrator, Phase, RunReport};
pub use runner::{StageResult, StageRunner};
pub use stage::{Selection, Suite};
pub use suite::{CommandSuite, EvaluationSuite, SuiteRegistry};
