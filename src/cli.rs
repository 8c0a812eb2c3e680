use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{EvalConfig, SimilarityScale};
use crate::model::Phase;

#[derive(Parser, Debug)]
#[command(
    name = "review-eval",
    version,
    about = "Score generated peer reviews against human reviews and measure rebuttal impact"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Evaluate(EvaluateArgs),
    Compare(CompareArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = "runs")]
    pub runs_dir: PathBuf,

    #[arg(long, default_value = "eval_results")]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long = "paper-id")]
    pub paper_ids: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub latest_only: bool,

    #[arg(long, default_value_t = false)]
    pub include_all_dirs: bool,

    /// Only evaluate run directories modified within `--hours-back` hours.
    #[arg(long, default_value_t = false)]
    pub recent_only: bool,

    #[arg(long, default_value_t = 24)]
    pub hours_back: u64,

    #[arg(long)]
    pub embedding_db: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long)]
    pub generated: PathBuf,

    /// A human review file: one review object or an array of them.
    #[arg(long = "reference", required = true)]
    pub references: Vec<PathBuf>,

    #[arg(long, default_value = "adhoc")]
    pub paper_id: String,

    #[arg(long, value_enum, default_value_t = Phase::Original)]
    pub phase: Phase,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Flags that take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    #[arg(long)]
    pub coverage_threshold: Option<f64>,

    #[arg(long, value_enum)]
    pub similarity_scale: Option<SimilarityScale>,

    #[arg(long)]
    pub summary_weight: Option<f64>,

    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long)]
    pub model_id: Option<String>,

    #[arg(long)]
    pub dimensions: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut EvalConfig) {
        if let Some(value) = self.coverage_threshold {
            config.coverage_threshold = value;
        }
        if let Some(value) = self.similarity_scale {
            config.similarity_scale = value;
        }
        if let Some(value) = self.summary_weight {
            config.summary_weight = value;
        }
        if let Some(value) = self.workers {
            config.workers = value;
        }
        if let Some(value) = &self.model_id {
            config.embedding_model_id = value.clone();
        }
        if let Some(value) = self.dimensions {
            config.embedding_dimensions = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_flags_override_config() {
        let cli = Cli::try_parse_from([
            "review-eval",
            "evaluate",
            "--runs-dir",
            "runs",
            "--paper-id",
            "100",
            "--paper-id",
            "101",
            "--latest-only",
            "--recent-only",
            "--hours-back",
            "6",
            "--coverage-threshold",
            "0.6",
            "--similarity-scale",
            "shifted",
        ])
        .expect("arguments should parse");

        let Commands::Evaluate(args) = cli.command else {
            panic!("expected evaluate command");
        };
        assert_eq!(args.paper_ids, vec!["100", "101"]);
        assert!(args.latest_only);
        assert!(args.recent_only);
        assert_eq!(args.hours_back, 6);

        let mut config = EvalConfig::default();
        args.overrides.apply(&mut config);
        assert_eq!(config.coverage_threshold, 0.6);
        assert_eq!(config.similarity_scale, SimilarityScale::Shifted);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn compare_requires_a_reference() {
        assert!(Cli::try_parse_from(["review-eval", "compare", "--generated", "g.json"]).is_err());

        let cli = Cli::try_parse_from([
            "review-eval",
            "compare",
            "--generated",
            "g.json",
            "--reference",
            "h1.json",
            "--reference",
            "h2.json",
            "--phase",
            "updated",
        ])
        .expect("arguments should parse");
        let Commands::Compare(args) = cli.command else {
            panic!("expected compare command");
        };
        assert_eq!(args.references.len(), 2);
        assert_eq!(args.phase, Phase::Updated);
    }
}
