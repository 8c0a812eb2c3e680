use serde::Serialize;

use super::scorer::PaperScore;
use crate::config::SignificanceThresholds;
use crate::model::Phase;

/// Deltas that land exactly on a threshold still count as crossing it.
const THRESHOLD_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceFlag {
    CoverageImproved,
    CoverageDecreased,
    SimilarityImproved,
    SimilarityDecreased,
}

impl SignificanceFlag {
    pub const ALL: [SignificanceFlag; 4] = [
        SignificanceFlag::CoverageImproved,
        SignificanceFlag::CoverageDecreased,
        SignificanceFlag::SimilarityImproved,
        SignificanceFlag::SimilarityDecreased,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::CoverageImproved => "Significant improvement in coverage",
            Self::CoverageDecreased => "Significant decrease in coverage",
            Self::SimilarityImproved => "Improved similarity to human reviews",
            Self::SimilarityDecreased => "Decreased similarity to human reviews",
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Self::CoverageImproved | Self::SimilarityImproved)
    }
}

/// Signed change from the `original` to the `updated` score of one paper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuttalImpact {
    pub paper_id: String,
    pub similarity_delta: f64,
    pub coverage_delta: f64,
    pub max_coverage_delta: f64,
    pub length_delta: i64,
    pub strengths_change: i64,
    pub weaknesses_change: i64,
    pub suggestions_change: i64,
    pub weaknesses_reduction_rate: f64,
    pub suggestions_reduction_rate: f64,
    pub flags: Vec<SignificanceFlag>,
}

pub fn analyze_rebuttal(
    original: &PaperScore,
    updated: &PaperScore,
    thresholds: &SignificanceThresholds,
) -> RebuttalImpact {
    debug_assert_eq!(original.paper_id, updated.paper_id);

    let similarity_delta = updated.similarity - original.similarity;
    let coverage_delta = updated.coverage - original.coverage;

    let strengths_change =
        count_change(original.item_counts.strengths, updated.item_counts.strengths);
    let weaknesses_change =
        count_change(original.item_counts.weaknesses, updated.item_counts.weaknesses);
    let suggestions_change =
        count_change(original.item_counts.suggestions, updated.item_counts.suggestions);

    RebuttalImpact {
        paper_id: original.paper_id.clone(),
        similarity_delta,
        coverage_delta,
        max_coverage_delta: updated.max_coverage - original.max_coverage,
        length_delta: count_change(original.length, updated.length),
        strengths_change,
        weaknesses_change,
        suggestions_change,
        weaknesses_reduction_rate: reduction_rate(
            weaknesses_change,
            original.item_counts.weaknesses,
        ),
        suggestions_reduction_rate: reduction_rate(
            suggestions_change,
            original.item_counts.suggestions,
        ),
        flags: significance_flags(similarity_delta, coverage_delta, thresholds),
    }
}

/// Finds both phases of `paper_id` among `scores`; `None` unless both exist.
pub fn impact_for_paper(
    scores: &[PaperScore],
    thresholds: &SignificanceThresholds,
) -> Option<RebuttalImpact> {
    let original = scores.iter().find(|score| score.phase == Phase::Original)?;
    let updated = scores.iter().find(|score| score.phase == Phase::Updated)?;
    Some(analyze_rebuttal(original, updated, thresholds))
}

fn significance_flags(
    similarity_delta: f64,
    coverage_delta: f64,
    thresholds: &SignificanceThresholds,
) -> Vec<SignificanceFlag> {
    let mut flags = Vec::new();

    let coverage_improved = coverage_delta >= thresholds.coverage_delta - THRESHOLD_TOLERANCE;
    let coverage_decreased = coverage_delta <= -thresholds.coverage_delta + THRESHOLD_TOLERANCE;
    // A zero threshold would otherwise flag an unchanged paper both ways.
    if coverage_improved && coverage_delta > 0.0 {
        flags.push(SignificanceFlag::CoverageImproved);
    }
    if coverage_decreased && coverage_delta < 0.0 {
        flags.push(SignificanceFlag::CoverageDecreased);
    }

    let coverage_regressed = flags.contains(&SignificanceFlag::CoverageDecreased);
    if similarity_delta > 0.0
        && similarity_delta >= thresholds.similarity_improvement - THRESHOLD_TOLERANCE
        && !coverage_regressed
    {
        flags.push(SignificanceFlag::SimilarityImproved);
    }
    if similarity_delta < 0.0
        && similarity_delta <= -thresholds.similarity_regression + THRESHOLD_TOLERANCE
    {
        flags.push(SignificanceFlag::SimilarityDecreased);
    }

    flags
}

fn count_change(original: usize, updated: usize) -> i64 {
    updated as i64 - original as i64
}

fn reduction_rate(change: i64, original_count: usize) -> f64 {
    if original_count == 0 {
        return 0.0;
    }
    (-change).max(0) as f64 / original_count as f64
}
