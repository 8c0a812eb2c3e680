use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CompareArgs;
use crate::commands::evaluate::{
    EmbeddingContext, MatchScoring, PaperScore, PaperScorer, TextSegmenter, parse_reference_set,
    parse_review_record,
};
use crate::config::{EvalConfig, load_eval_config};
use crate::error::EvalError;
use crate::model::{Phase, ReferenceSet, ReviewSnapshot};
use crate::semantic::{EmbeddingCache, LocalHashEmbedder, resolve_model_config};
use crate::util::{format_percent, write_json_pretty};

pub fn run(args: CompareArgs) -> Result<()> {
    let mut config = load_eval_config(args.config.as_deref())?;
    args.overrides.apply(&mut config);
    config.validate().context("invalid evaluation config")?;

    let score = compare_files(
        &args.generated,
        &args.references,
        &args.paper_id,
        args.phase,
        &config,
    )?;
    info!(
        paper_id = %score.paper_id,
        phase = %score.phase,
        references = score.reference_count,
        similarity = %format_percent(score.similarity),
        coverage = %format_percent(score.coverage),
        max_coverage = %format_percent(score.max_coverage),
        "compared review"
    );

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &score)?;
            info!(path = %path.display(), "wrote comparison");
        }
        None => {
            let mut output = io::BufWriter::new(io::stdout().lock());
            serde_json::to_writer_pretty(&mut output, &score)
                .context("failed to serialize comparison json output")?;
            writeln!(output)?;
            output.flush()?;
        }
    }

    Ok(())
}

/// Scores one generated review file against one or more human review files.
pub fn compare_files<P: AsRef<Path>>(
    generated: &Path,
    references: &[P],
    paper_id: &str,
    phase: Phase,
    config: &EvalConfig,
) -> Result<PaperScore> {
    let raw = read_file(generated)?;
    let record = parse_review_record(&raw, paper_id, phase.as_str())?;

    let mut reference_set = ReferenceSet {
        paper_id: paper_id.to_string(),
        references: Vec::new(),
    };
    for path in references {
        let raw = read_file(path.as_ref())?;
        let parsed = if raw.trim_start().starts_with('[') {
            parse_reference_set(&raw, paper_id).map(|set| set.references)
        } else {
            parse_review_record(&raw, paper_id, "reference").map(|record| vec![record])
        };
        let parsed = parsed.map_err(|error| label_with_source(error, path.as_ref()))?;
        reference_set.references.extend(parsed);
    }

    let embedder = LocalHashEmbedder::new(resolve_model_config(
        &config.embedding_model_id,
        config.embedding_dimensions,
    ));
    let cache = EmbeddingCache::new();
    let segmenter = TextSegmenter::new();
    let scorer = PaperScorer::new(
        &segmenter,
        EmbeddingContext {
            provider: &embedder,
            cache: &cache,
            retry: &config.retry,
        },
        MatchScoring {
            coverage_threshold: config.coverage_threshold,
            scale: config.similarity_scale,
        },
        config.summary_weight,
    );

    let snapshot = ReviewSnapshot {
        paper_id: paper_id.to_string(),
        phase,
        record,
    };
    Ok(scorer.score(&snapshot, &reference_set)?)
}

/// Prefixes malformed-record labels with the file they came from, since
/// every reference file numbers its records from zero.
fn label_with_source(error: EvalError, path: &Path) -> EvalError {
    match error {
        EvalError::MalformedReviewRecord {
            paper_id,
            record,
            reason,
        } => EvalError::MalformedReviewRecord {
            paper_id,
            record: format!("{}:{record}", path.display()),
            reason,
        },
        other => other,
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
