use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::scorer::PaperScore;
use crate::error::EmbeddingFailure;
use crate::model::{FieldCounts, Phase, ReviewPoint, ReviewRecord, ReviewSnapshot};
use crate::semantic::EmbeddingProvider;

/// Fixed text-to-vector table; unknown text is a provider failure.
pub struct LookupEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
    pub calls: AtomicUsize,
}

impl LookupEmbedder {
    pub fn new<const N: usize>(entries: &[(&str, [f32; N])]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.to_vec()))
                .collect(),
            dimensions: N,
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingProvider for LookupEmbedder {
    fn model_id(&self) -> &str {
        "lookup"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingFailure::new("lookup", format!("no vector for {text:?}")))
    }
}

/// Fails for any text containing `poison`, otherwise delegates.
pub struct PoisonedEmbedder<P> {
    pub inner: P,
    pub poison: &'static str,
}

impl<P: EmbeddingProvider> EmbeddingProvider for PoisonedEmbedder<P> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        if text.contains(self.poison) {
            return Err(EmbeddingFailure::new("poisoned", "upstream timed out"));
        }
        self.inner.embed(text)
    }
}

pub fn review(
    summary: &str,
    strengths: &[&str],
    weaknesses: &[&str],
    suggestions: &[&str],
) -> ReviewRecord {
    let points = |items: &[&str]| -> Vec<ReviewPoint> {
        items.iter().map(|item| ReviewPoint::from(*item)).collect()
    };
    ReviewRecord {
        reviewer_id: None,
        summary: summary.to_string(),
        strengths: points(strengths),
        weaknesses: points(weaknesses),
        suggestions: points(suggestions),
        questions: vec![],
        scores: None,
        overall: None,
        confidence: None,
    }
}

pub fn snapshot(paper_id: &str, phase: Phase, record: ReviewRecord) -> ReviewSnapshot {
    ReviewSnapshot {
        paper_id: paper_id.to_string(),
        phase,
        record,
    }
}

pub fn paper_score(paper_id: &str, phase: Phase, similarity: f64, coverage: f64) -> PaperScore {
    let counts = FieldCounts {
        summary: 1,
        strengths: 2,
        weaknesses: 2,
        suggestions: 1,
    };
    PaperScore {
        paper_id: paper_id.to_string(),
        phase,
        similarity,
        coverage,
        max_coverage: coverage,
        max_similarity: similarity,
        point_similarity: similarity,
        summary_similarity: None,
        length: 200,
        avg_human_length: 250.0,
        length_ratio: 0.8,
        reference_count: 3,
        unit_counts: counts,
        item_counts: counts,
        per_reference: vec![],
    }
}
