use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use super::rebuttal::{RebuttalImpact, SignificanceFlag};
use super::scorer::{PaperScore, mean};
use super::significance::DeltaSignificance;
use crate::config::EvalConfig;
use crate::error::PaperFailure;
use crate::model::{FieldCounts, Phase, ReviewField};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub papers: usize,
    pub avg_similarity: f64,
    pub avg_coverage: f64,
    pub avg_max_coverage: f64,
    pub avg_max_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldShare {
    pub count: usize,
    pub total: usize,
    pub fraction: f64,
}

/// Share of snapshots in which each field produced at least one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuralCompleteness {
    pub summary: FieldShare,
    pub strengths: FieldShare,
    pub weaknesses: FieldShare,
    pub suggestions: FieldShare,
}

impl StructuralCompleteness {
    pub fn get(&self, field: ReviewField) -> &FieldShare {
        match field {
            ReviewField::Summary => &self.summary,
            ReviewField::Strengths => &self.strengths,
            ReviewField::Weaknesses => &self.weaknesses,
            ReviewField::Suggestions => &self.suggestions,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeanFieldCounts {
    pub summary: f64,
    pub strengths: f64,
    pub weaknesses: f64,
    pub suggestions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extremum {
    pub paper_id: String,
    pub phase: Phase,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extrema {
    pub highest_similarity: Extremum,
    pub lowest_similarity: Extremum,
    pub best_coverage: Extremum,
    pub worst_coverage: Extremum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagCounts {
    pub coverage_improved: usize,
    pub coverage_decreased: usize,
    pub similarity_improved: usize,
    pub similarity_decreased: usize,
}

impl FlagCounts {
    pub fn get(&self, flag: SignificanceFlag) -> usize {
        match flag {
            SignificanceFlag::CoverageImproved => self.coverage_improved,
            SignificanceFlag::CoverageDecreased => self.coverage_decreased,
            SignificanceFlag::SimilarityImproved => self.similarity_improved,
            SignificanceFlag::SimilarityDecreased => self.similarity_decreased,
        }
    }

    fn record(&mut self, flag: SignificanceFlag) {
        match flag {
            SignificanceFlag::CoverageImproved => self.coverage_improved += 1,
            SignificanceFlag::CoverageDecreased => self.coverage_decreased += 1,
            SignificanceFlag::SimilarityImproved => self.similarity_improved += 1,
            SignificanceFlag::SimilarityDecreased => self.similarity_decreased += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuttalSummary {
    pub papers_with_rebuttal: usize,
    pub mean_similarity_delta: f64,
    pub mean_coverage_delta: f64,
    pub mean_max_coverage_delta: f64,
    pub mean_length_delta: f64,
    pub mean_strengths_change: f64,
    pub mean_weaknesses_change: f64,
    pub mean_suggestions_change: f64,
    pub mean_weaknesses_reduction_rate: f64,
    pub mean_suggestions_reduction_rate: f64,
    pub papers_with_weakness_reduction: usize,
    pub papers_with_suggestion_reduction: usize,
    pub flag_counts: FlagCounts,
    pub coverage_significance: DeltaSignificance,
    pub similarity_significance: DeltaSignificance,
}

/// Run-wide fold of every score, impact and failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusSummary {
    pub total_papers: usize,
    pub total_snapshots: usize,
    pub avg_similarity: f64,
    pub avg_coverage: f64,
    pub avg_max_coverage: f64,
    pub avg_max_similarity: f64,
    pub avg_human_length: f64,
    pub phases: Vec<PhaseSummary>,
    pub structural_completeness: StructuralCompleteness,
    pub content_counts: MeanFieldCounts,
    pub item_counts: MeanFieldCounts,
    pub extrema: Option<Extrema>,
    pub rebuttal: RebuttalSummary,
    pub failed_papers: Vec<String>,
    pub failures: Vec<PaperFailure>,
}

/// Folds per-paper results into one summary.
///
/// Inputs are put into canonical order first, so any permutation of the same
/// records produces a bit-identical summary.
pub fn summarize_corpus(
    scores: &[PaperScore],
    impacts: &[RebuttalImpact],
    failures: &[PaperFailure],
    config: &EvalConfig,
) -> CorpusSummary {
    let mut scores = scores.iter().collect::<Vec<_>>();
    scores.sort_by(|left, right| canonical_score_order(left, right));
    let mut impacts = impacts.iter().collect::<Vec<_>>();
    impacts.sort_by(|left, right| canonical_impact_order(left, right));
    let mut failures = failures.to_vec();
    failures.sort();
    failures.dedup();

    let total_papers = scores
        .iter()
        .map(|score| score.paper_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let failed_papers = failures
        .iter()
        .map(|failure| failure.paper_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    CorpusSummary {
        total_papers,
        total_snapshots: scores.len(),
        avg_similarity: mean(scores.iter().map(|score| score.similarity)),
        avg_coverage: mean(scores.iter().map(|score| score.coverage)),
        avg_max_coverage: mean(scores.iter().map(|score| score.max_coverage)),
        avg_max_similarity: mean(scores.iter().map(|score| score.max_similarity)),
        avg_human_length: mean(scores.iter().map(|score| score.avg_human_length)),
        phases: phase_summaries(&scores),
        structural_completeness: structural_completeness(&scores),
        content_counts: mean_counts(&scores, |score| score.unit_counts),
        item_counts: mean_counts(&scores, |score| score.item_counts),
        extrema: extrema(&scores),
        rebuttal: rebuttal_summary(&impacts, config),
        failed_papers,
        failures,
    }
}

fn canonical_score_order(left: &PaperScore, right: &PaperScore) -> Ordering {
    left.paper_id
        .cmp(&right.paper_id)
        .then(left.phase.cmp(&right.phase))
        .then(left.similarity.total_cmp(&right.similarity))
        .then(left.coverage.total_cmp(&right.coverage))
        .then(left.length.cmp(&right.length))
}

fn canonical_impact_order(left: &RebuttalImpact, right: &RebuttalImpact) -> Ordering {
    left.paper_id
        .cmp(&right.paper_id)
        .then(left.similarity_delta.total_cmp(&right.similarity_delta))
        .then(left.coverage_delta.total_cmp(&right.coverage_delta))
}

fn phase_summaries(scores: &[&PaperScore]) -> Vec<PhaseSummary> {
    Phase::ALL
        .iter()
        .filter_map(|phase| {
            let phase_scores = scores
                .iter()
                .filter(|score| score.phase == *phase)
                .collect::<Vec<_>>();
            if phase_scores.is_empty() {
                return None;
            }
            Some(PhaseSummary {
                phase: *phase,
                papers: phase_scores.len(),
                avg_similarity: mean(phase_scores.iter().map(|score| score.similarity)),
                avg_coverage: mean(phase_scores.iter().map(|score| score.coverage)),
                avg_max_coverage: mean(phase_scores.iter().map(|score| score.max_coverage)),
                avg_max_similarity: mean(phase_scores.iter().map(|score| score.max_similarity)),
            })
        })
        .collect()
}

fn structural_completeness(scores: &[&PaperScore]) -> StructuralCompleteness {
    let share = |field: ReviewField| {
        let count = scores
            .iter()
            .filter(|score| score.unit_counts.get(field) > 0)
            .count();
        FieldShare {
            count,
            total: scores.len(),
            fraction: if scores.is_empty() {
                0.0
            } else {
                count as f64 / scores.len() as f64
            },
        }
    };

    StructuralCompleteness {
        summary: share(ReviewField::Summary),
        strengths: share(ReviewField::Strengths),
        weaknesses: share(ReviewField::Weaknesses),
        suggestions: share(ReviewField::Suggestions),
    }
}

fn mean_counts(
    scores: &[&PaperScore],
    counts: impl Fn(&PaperScore) -> FieldCounts,
) -> MeanFieldCounts {
    let field_mean = |field: ReviewField| {
        mean(scores.iter().map(|score| counts(*score).get(field) as f64))
    };
    MeanFieldCounts {
        summary: field_mean(ReviewField::Summary),
        strengths: field_mean(ReviewField::Strengths),
        weaknesses: field_mean(ReviewField::Weaknesses),
        suggestions: field_mean(ReviewField::Suggestions),
    }
}

fn extrema(scores: &[&PaperScore]) -> Option<Extrema> {
    let first = scores.first()?;
    let extremum = |score: &PaperScore, value: f64| Extremum {
        paper_id: score.paper_id.clone(),
        phase: score.phase,
        value,
    };

    // Scores are in canonical order, so strict comparisons keep the smallest
    // (paper_id, phase) on ties.
    let mut highest_similarity = *first;
    let mut lowest_similarity = *first;
    let mut best_coverage = *first;
    let mut worst_coverage = *first;
    for score in scores.iter().skip(1).copied() {
        if score.similarity > highest_similarity.similarity {
            highest_similarity = score;
        }
        if score.similarity < lowest_similarity.similarity {
            lowest_similarity = score;
        }
        if score.coverage > best_coverage.coverage {
            best_coverage = score;
        }
        if score.coverage < worst_coverage.coverage {
            worst_coverage = score;
        }
    }

    Some(Extrema {
        highest_similarity: extremum(highest_similarity, highest_similarity.similarity),
        lowest_similarity: extremum(lowest_similarity, lowest_similarity.similarity),
        best_coverage: extremum(best_coverage, best_coverage.coverage),
        worst_coverage: extremum(worst_coverage, worst_coverage.coverage),
    })
}

fn rebuttal_summary(impacts: &[&RebuttalImpact], config: &EvalConfig) -> RebuttalSummary {
    let mut flag_counts = FlagCounts::default();
    for flag in impacts.iter().flat_map(|impact| impact.flags.iter()) {
        flag_counts.record(*flag);
    }

    let coverage_deltas = impacts
        .iter()
        .map(|impact| impact.coverage_delta)
        .collect::<Vec<_>>();
    let similarity_deltas = impacts
        .iter()
        .map(|impact| impact.similarity_delta)
        .collect::<Vec<_>>();

    RebuttalSummary {
        papers_with_rebuttal: impacts.len(),
        mean_similarity_delta: mean(similarity_deltas.iter().copied()),
        mean_coverage_delta: mean(coverage_deltas.iter().copied()),
        mean_max_coverage_delta: mean(impacts.iter().map(|impact| impact.max_coverage_delta)),
        mean_length_delta: mean(impacts.iter().map(|impact| impact.length_delta as f64)),
        mean_strengths_change: mean(impacts.iter().map(|impact| impact.strengths_change as f64)),
        mean_weaknesses_change: mean(impacts.iter().map(|impact| impact.weaknesses_change as f64)),
        mean_suggestions_change: mean(
            impacts
                .iter()
                .map(|impact| impact.suggestions_change as f64),
        ),
        mean_weaknesses_reduction_rate: mean(
            impacts
                .iter()
                .map(|impact| impact.weaknesses_reduction_rate),
        ),
        mean_suggestions_reduction_rate: mean(
            impacts
                .iter()
                .map(|impact| impact.suggestions_reduction_rate),
        ),
        papers_with_weakness_reduction: impacts
            .iter()
            .filter(|impact| impact.weaknesses_change < 0)
            .count(),
        papers_with_suggestion_reduction: impacts
            .iter()
            .filter(|impact| impact.suggestions_change < 0)
            .count(),
        flag_counts,
        coverage_significance: DeltaSignificance::from_deltas(
            &coverage_deltas,
            config.bootstrap_iterations,
            config.bootstrap_seed,
        ),
        similarity_significance: DeltaSignificance::from_deltas(
            &similarity_deltas,
            config.bootstrap_iterations,
            config.bootstrap_seed,
        ),
    }
}
