use serde::Serialize;
use tracing::debug;

use super::matcher::{EmbeddingContext, MatchScoring, SemanticUnit, match_units};
use super::segmenter::{SegmentedReview, TextSegmenter};
use crate::error::EvalError;
use crate::model::{FieldCounts, Phase, ReferenceSet, ReviewSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceScore {
    pub reviewer_id: String,
    pub similarity: f64,
    pub coverage: f64,
    pub reference_units: usize,
    pub matched_units: usize,
    pub length: usize,
}

/// Scores of one snapshot against its paper's references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperScore {
    pub paper_id: String,
    pub phase: Phase,
    pub similarity: f64,
    pub coverage: f64,
    pub max_coverage: f64,
    pub max_similarity: f64,
    pub point_similarity: f64,
    pub summary_similarity: Option<f64>,
    pub length: usize,
    pub avg_human_length: f64,
    pub length_ratio: f64,
    pub reference_count: usize,
    pub unit_counts: FieldCounts,
    pub item_counts: FieldCounts,
    pub per_reference: Vec<ReferenceScore>,
}

struct EmbeddedReview {
    points: Vec<SemanticUnit>,
    summary: Vec<SemanticUnit>,
}

pub struct PaperScorer<'a> {
    segmenter: &'a TextSegmenter,
    embeddings: EmbeddingContext<'a>,
    scoring: MatchScoring,
    summary_weight: f64,
}

impl<'a> PaperScorer<'a> {
    pub fn new(
        segmenter: &'a TextSegmenter,
        embeddings: EmbeddingContext<'a>,
        scoring: MatchScoring,
        summary_weight: f64,
    ) -> Self {
        Self {
            segmenter,
            embeddings,
            scoring,
            summary_weight: summary_weight.clamp(0.0, 1.0),
        }
    }

    /// Runs the matcher once per reference. The snapshot is segmented and
    /// embedded once and reused for every reference.
    pub fn score(
        &self,
        snapshot: &ReviewSnapshot,
        references: &ReferenceSet,
    ) -> Result<PaperScore, EvalError> {
        let paper_id = snapshot.paper_id.as_str();
        if references.is_empty() {
            return Err(EvalError::ReferenceSetEmpty {
                paper_id: paper_id.to_string(),
            });
        }

        let segmented = self.segmenter.segment(&snapshot.record);
        let generated = self.embed_review(paper_id, &segmented)?;

        let mut per_reference = Vec::with_capacity(references.len());
        let mut summary_scores = Vec::<f64>::new();
        for (index, record) in references.references.iter().enumerate() {
            let reference = self.embed_review(paper_id, &self.segmenter.segment(record))?;
            let result = match_units(&generated.points, &reference.points, &self.scoring);

            if !generated.summary.is_empty() && !reference.summary.is_empty() {
                let summary = match_units(&generated.summary, &reference.summary, &self.scoring);
                summary_scores.push(summary.similarity);
            }

            per_reference.push(ReferenceScore {
                reviewer_id: references.reviewer_label(index),
                similarity: result.similarity,
                coverage: result.coverage,
                reference_units: result.reference_len(),
                matched_units: result.matched_count,
                length: record.rendered_length(),
            });
        }

        let point_similarity = mean(per_reference.iter().map(|score| score.similarity));
        let coverage = mean(per_reference.iter().map(|score| score.coverage));
        let max_coverage = per_reference
            .iter()
            .map(|score| score.coverage)
            .fold(0.0_f64, f64::max);
        let max_similarity = per_reference
            .iter()
            .map(|score| score.similarity)
            .fold(0.0_f64, f64::max);
        let summary_similarity =
            (!summary_scores.is_empty()).then(|| mean(summary_scores.iter().copied()));

        let length = snapshot.record.rendered_length();
        let avg_human_length = mean(per_reference.iter().map(|score| score.length as f64));

        let similarity = match summary_similarity {
            Some(summary) if self.summary_weight > 0.0 => {
                (1.0 - self.summary_weight) * point_similarity + self.summary_weight * summary
            }
            _ => point_similarity,
        };

        debug!(
            paper_id = %paper_id,
            phase = %snapshot.phase,
            references = per_reference.len(),
            similarity,
            coverage,
            "scored snapshot"
        );

        Ok(PaperScore {
            paper_id: paper_id.to_string(),
            phase: snapshot.phase,
            similarity: similarity.clamp(0.0, 1.0),
            coverage,
            max_coverage,
            max_similarity,
            point_similarity,
            summary_similarity,
            length,
            avg_human_length,
            length_ratio: length as f64 / avg_human_length.max(1.0),
            reference_count: references.len(),
            unit_counts: segmented.unit_counts(),
            item_counts: snapshot.record.item_counts(),
            per_reference,
        })
    }

    fn embed_review(
        &self,
        paper_id: &str,
        segmented: &SegmentedReview,
    ) -> Result<EmbeddedReview, EvalError> {
        let points = segmented.points().collect::<Vec<_>>();
        let summary = segmented.summary.iter().collect::<Vec<_>>();
        Ok(EmbeddedReview {
            points: self.embeddings.embed_units(paper_id, &points)?,
            summary: self.embeddings.embed_units(paper_id, &summary)?,
        })
    }
}

pub(super) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0_f64, 0usize), |(sum, count), value| {
        (sum + value, count + 1)
    });
    if count == 0 { 0.0 } else { sum / count as f64 }
}
