use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::aggregate::{CorpusSummary, summarize_corpus};
use super::corpus::{DiscoveryOptions, PaperInput, discover_paper_dirs, load_paper};
use super::matcher::{EmbeddingContext, MatchScoring};
use super::rebuttal::{RebuttalImpact, impact_for_paper};
use super::report::{EvaluationReport, detailed_rows, render_markdown, write_detailed_csv};
use super::scorer::{PaperScore, PaperScorer};
use super::segmenter::TextSegmenter;
use crate::cli::EvaluateArgs;
use crate::config::{EvalConfig, load_eval_config};
use crate::error::{EvalError, PaperFailure};
use crate::semantic::{EmbeddingCache, EmbeddingProvider, LocalHashEmbedder, resolve_model_config};
use crate::store::SqliteEmbeddingStore;
use crate::util::{ensure_directory, format_percent, write_json_pretty, write_text_file};

const REPORT_FILE: &str = "evaluation_report.json";
const SUMMARY_FILE: &str = "evaluation_summary.md";
const DETAILED_FILE: &str = "detailed_comparison.csv";

/// Results of one paper: whatever scored, the rebuttal impact when both
/// phases scored, and every failure attributed to the paper.
#[derive(Debug, Clone, Serialize)]
pub struct PaperOutcome {
    pub paper_id: String,
    pub source_dir: String,
    pub scores: Vec<PaperScore>,
    pub impact: Option<RebuttalImpact>,
    pub failures: Vec<PaperFailure>,
}

#[derive(Debug, Clone)]
pub struct CorpusEvaluation {
    pub outcomes: Vec<PaperOutcome>,
    pub summary: CorpusSummary,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let mut config = load_eval_config(args.config.as_deref())?;
    args.overrides.apply(&mut config);
    config.validate().context("invalid evaluation config")?;

    let modified_since = if args.recent_only {
        let window = Duration::from_secs(args.hours_back.saturating_mul(3600));
        Some(
            SystemTime::now()
                .checked_sub(window)
                .unwrap_or(SystemTime::UNIX_EPOCH),
        )
    } else {
        None
    };
    let options = DiscoveryOptions {
        paper_ids: args.paper_ids.clone(),
        latest_only: args.latest_only,
        include_all_dirs: args.include_all_dirs,
        modified_since,
    };
    let dirs = discover_paper_dirs(&args.runs_dir, &options)?;
    if dirs.is_empty() {
        warn!(runs_dir = %args.runs_dir.display(), "no paper directories found");
    }
    info!(papers = dirs.len(), runs_dir = %args.runs_dir.display(), "discovered paper runs");

    let inputs = dirs.iter().map(load_paper).collect::<Vec<_>>();

    let model = resolve_model_config(&config.embedding_model_id, config.embedding_dimensions);
    let embedder = LocalHashEmbedder::new(model.clone());
    let cache = EmbeddingCache::new();
    let evaluation = match &args.embedding_db {
        Some(db_path) => {
            let store = SqliteEmbeddingStore::open(db_path, embedder)?;
            let evaluation = evaluate_corpus(&inputs, &store, &config, &cache)?;
            info!(
                path = %db_path.display(),
                stored = store.stored_count()?,
                "embedding store updated"
            );
            evaluation
        }
        None => evaluate_corpus(&inputs, &embedder, &config, &cache)?,
    };

    let report = EvaluationReport::build(
        &evaluation,
        &config,
        model,
        cache.stats(),
        &args.runs_dir,
        Utc::now(),
    );

    ensure_directory(&args.output_dir)?;
    let report_path = args.output_dir.join(REPORT_FILE);
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote evaluation report");

    let summary_path = args.output_dir.join(SUMMARY_FILE);
    write_text_file(&summary_path, &render_markdown(&report)?)?;
    info!(path = %summary_path.display(), "wrote evaluation summary");

    let detailed_path = args.output_dir.join(DETAILED_FILE);
    write_detailed_csv(&detailed_path, &detailed_rows(&report))?;
    info!(path = %detailed_path.display(), "wrote detailed comparison");

    let summary = &evaluation.summary;
    info!(
        run_id = %report.run_id,
        papers = summary.total_papers,
        snapshots = summary.total_snapshots,
        failed_papers = summary.failed_papers.len(),
        avg_similarity = %format_percent(summary.avg_similarity),
        avg_coverage = %format_percent(summary.avg_coverage),
        "evaluation completed"
    );

    Ok(())
}

/// Scores every paper on a run-local worker pool and folds the results.
///
/// Papers never share state beyond the provider and the run's embedding
/// cache; a failing paper only adds failure rows.
pub fn evaluate_corpus(
    inputs: &[PaperInput],
    provider: &dyn EmbeddingProvider,
    config: &EvalConfig,
    cache: &EmbeddingCache,
) -> Result<CorpusEvaluation> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|index| format!("eval-worker-{index}"))
        .build()
        .context("failed to build evaluation worker pool")?;

    let segmenter = TextSegmenter::new();
    let context = EmbeddingContext {
        provider,
        cache,
        retry: &config.retry,
    };

    let mut outcomes = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| evaluate_paper(input, &segmenter, context, config))
            .collect::<Vec<_>>()
    });
    outcomes.sort_by(|a, b| a.paper_id.cmp(&b.paper_id));

    let scores = outcomes
        .iter()
        .flat_map(|outcome| outcome.scores.iter().cloned())
        .collect::<Vec<_>>();
    let impacts = outcomes
        .iter()
        .filter_map(|outcome| outcome.impact.clone())
        .collect::<Vec<_>>();
    let failures = outcomes
        .iter()
        .flat_map(|outcome| outcome.failures.iter().cloned())
        .collect::<Vec<_>>();

    let summary = summarize_corpus(&scores, &impacts, &failures, config);
    Ok(CorpusEvaluation { outcomes, summary })
}

pub fn evaluate_paper(
    input: &PaperInput,
    segmenter: &TextSegmenter,
    context: EmbeddingContext<'_>,
    config: &EvalConfig,
) -> PaperOutcome {
    let paper_id = input.paper_id.as_str();
    let mut failures = input.load_failures.clone();
    let mut scores = Vec::new();

    match &input.references {
        Some(references) if references.is_empty() => {
            let error = EvalError::ReferenceSetEmpty {
                paper_id: paper_id.to_string(),
            };
            warn!(paper_id = %paper_id, error = %error, "paper skipped");
            failures.push(PaperFailure::from_error(None, &error));
        }
        Some(references) => {
            let scoring = MatchScoring {
                coverage_threshold: config.coverage_threshold,
                scale: config.similarity_scale,
            };
            let scorer = PaperScorer::new(segmenter, context, scoring, config.summary_weight);
            for snapshot in &input.snapshots {
                match scorer.score(snapshot, references) {
                    Ok(score) => {
                        info!(
                            paper_id = %paper_id,
                            phase = %snapshot.phase,
                            similarity = %format_percent(score.similarity),
                            coverage = %format_percent(score.coverage),
                            "scored snapshot"
                        );
                        scores.push(score);
                    }
                    Err(error) => {
                        warn!(
                            paper_id = %paper_id,
                            phase = %snapshot.phase,
                            kind = error.kind(),
                            error = %error,
                            "snapshot evaluation failed"
                        );
                        failures.push(PaperFailure::from_error(Some(snapshot.phase), &error));
                    }
                }
            }
        }
        None => {}
    }

    failures.sort();
    PaperOutcome {
        paper_id: paper_id.to_string(),
        source_dir: input.source_dir.display().to_string(),
        impact: impact_for_paper(&scores, &config.significance),
        scores,
        failures,
    }
}
