//! Evaluation suites and stage selection.

use serde::{Deserialize, Serialize};

/// The evaluation suites a leaderboard run can execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Suite {
    /// Structured Japanese benchmark (llm-jp-eval).
    LlmJpEval,

    /// Pairwise-judged conversational benchmark (MT-Bench).
    MtBench,
}

impl Suite {
    /// Fixed execution order.
    pub const ORDER: [Suite; 2] = [Suite::LlmJpEval, Suite::MtBench];

    pub fn name(&self) -> &'static str {
        match self {
            Suite::LlmJpEval => "llm-jp-eval",
            Suite::MtBench => "mtbench",
        }
    }

    /// Key of this suite under the `suites` config section.
    pub fn config_key(&self) -> &'static str {
        match self {
            Suite::LlmJpEval => "llm_jp_eval",
            Suite::MtBench => "mtbench",
        }
    }

    /// Appended to `wandb.run_name` when this suite runs alone.
    pub fn run_name_suffix(&self) -> String {
        format!("_{}-only", self.name())
    }

    /// Environment variables that must be set and non-empty before the suite runs.
    pub fn required_env(&self) -> &'static [&'static str] {
        match self {
            Suite::LlmJpEval => &[],
            Suite::MtBench => &["OPENAI_API_KEY"],
        }
    }
}

impl std::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which suites the caller asked for.
///
/// The two flags are not exclusive: setting both runs both, the same as
/// setting neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub llm_jp_eval_only: bool,
    pub mtbench_only: bool,
}

impl Selection {
    pub fn new(llm_jp_eval_only: bool, mtbench_only: bool) -> Self {
        Self {
            llm_jp_eval_only,
            mtbench_only,
        }
    }

    /// Both "only" flags were given.
    pub fn is_conflicting(&self) -> bool {
        self.llm_jp_eval_only && self.mtbench_only
    }

    /// The suite that runs alone, if exactly one flag is set.
    pub fn single_stage(&self) -> Option<Suite> {
        match (self.llm_jp_eval_only, self.mtbench_only) {
            (true, false) => Some(Suite::LlmJpEval),
            (false, true) => Some(Suite::MtBench),
            _ => None,
        }
    }

    /// Stages to execute, in execution order.
    pub fn plan(&self) -> Vec<Suite> {
        match self.single_stage() {
            Some(suite) => vec![suite],
            None => Suite::ORDER.to_vec(),
        }
    }
}
