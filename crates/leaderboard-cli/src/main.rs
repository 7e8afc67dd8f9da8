//! Leaderboard - automated benchmark run for a language model
//!
//! ```text
//! leaderboard [CONFIG] [-m MODEL] [--llm-jp-eval-only] [--mtbench-only]
//! ```
//!
//! Resolves the configuration, runs llm-jp-eval and MT-Bench through the
//! commands configured under `suites`, and records the run in a
//! directory-backed tracking store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use leaderboard_core::telemetry::{init_tracing, level_for_verbosity};
use leaderboard_core::ConfigResolver;
use leaderboard_eval::{
    Invocation, Orchestrator, OrchestratorError, RunReport, Selection, SuiteRegistry,
};
use run_tracker::FsTracker;

#[derive(Parser, Debug)]
#[command(name = "leaderboard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the LLM leaderboard evaluation suites", long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(default_value = "configs/config.yaml")]
    config: PathBuf,

    /// Model to evaluate (hub id or local path); overrides the config
    #[arg(short, long, env = "LEADERBOARD_MODEL")]
    model: Option<String>,

    /// Run only llm-jp-eval
    #[arg(long)]
    llm_jp_eval_only: bool,

    /// Run only MT-Bench
    #[arg(long)]
    mtbench_only: bool,

    /// Root directory of the tracking store
    #[arg(long, env = "LEADERBOARD_TRACKING_DIR", default_value = ".leaderboard/runs")]
    tracking_dir: PathBuf,

    /// Do not create a tracking run
    #[arg(long)]
    no_tracking: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn invocation(&self) -> Invocation {
        let invocation = Invocation::new(&self.config)
            .with_selection(Selection::new(self.llm_jp_eval_only, self.mtbench_only));
        match &self.model {
            Some(model) => invocation.with_model(model),
            None => invocation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    if cli.print_config {
        return cmd_print_config(&cli);
    }

    match cmd_run(&cli).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_missing_credential() {
                eprintln!("MT-Bench judges with the OpenAI API; export OPENAI_API_KEY or pass --llm-jp-eval-only.");
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn cmd_print_config(cli: &Cli) -> Result<()> {
    let config = ConfigResolver::new()
        .resolve(&cli.config, cli.model.as_deref())
        .with_context(|| format!("Failed to resolve {}", cli.config.display()))?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

async fn cmd_run(cli: &Cli) -> Result<RunReport, OrchestratorError> {
    let mut orchestrator = Orchestrator::new(SuiteRegistry::with_command_suites());
    if !cli.no_tracking {
        let tracker = FsTracker::new(&cli.tracking_dir)?;
        orchestrator = orchestrator.with_tracker(Arc::new(tracker));
    }
    orchestrator.run(&cli.invocation()).await
}

fn print_report(report: &RunReport) {
    println!(
        "Run ID: {}",
        report
            .run_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(untracked)".to_string())
    );
    println!("Run name: {}", report.run_name);
    println!("Duration: {}ms", report.duration_ms);
    println!();
    for stage in &report.stages {
        println!(
            "  ✓ {} ({}ms, +{} rows)",
            stage.suite,
            stage.duration_ms,
            stage.rows_added()
        );
    }
    println!();
    println!(
        "Results: {} rows x {} columns{}",
        report.table.len(),
        report.table.columns().len(),
        if report.published { ", published" } else { "" }
    );
}
