use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::segmenter::UnitCandidate;
use crate::config::{RetryPolicy, SimilarityScale};
use crate::error::{EmbeddingFailure, EvalError};
use crate::semantic::{EmbeddingCache, EmbeddingProvider, cosine_similarity};

/// Embedding of one segmented unit of review text.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticUnit {
    pub vector: Arc<[f32]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScoring {
    pub coverage_threshold: f64,
    pub scale: SimilarityScale,
}

/// Best generated unit for the reference unit at the same position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitMatch {
    pub generated_index: Option<usize>,
    pub score: f64,
}

/// Alignment of one generated unit sequence against one reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<UnitMatch>,
    pub similarity: f64,
    pub coverage: f64,
    pub matched_count: usize,
}

impl MatchResult {
    pub fn reference_len(&self) -> usize {
        self.matches.len()
    }
}

/// Everything the matcher needs to turn text into vectors for one paper.
#[derive(Clone, Copy)]
pub struct EmbeddingContext<'a> {
    pub provider: &'a dyn EmbeddingProvider,
    pub cache: &'a EmbeddingCache,
    pub retry: &'a RetryPolicy,
}

impl EmbeddingContext<'_> {
    pub fn embed_units(
        &self,
        paper_id: &str,
        candidates: &[&UnitCandidate],
    ) -> Result<Vec<SemanticUnit>, EvalError> {
        candidates
            .iter()
            .map(|candidate| {
                Ok(SemanticUnit {
                    vector: self.embed_cached(paper_id, &candidate.text)?,
                })
            })
            .collect()
    }

    fn embed_cached(&self, paper_id: &str, text: &str) -> Result<Arc<[f32]>, EvalError> {
        let key = EmbeddingCache::key_for(self.provider.model_id(), text);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }
        let vector = embed_with_retry(self.provider, text, self.retry, paper_id)?;
        Ok(self.cache.insert(key, vector))
    }
}

/// Calls the provider, retrying with capped exponential backoff.
pub fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &RetryPolicy,
    paper_id: &str,
) -> Result<Vec<f32>, EvalError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 1..=max_attempts {
        match provider.embed(text).and_then(|vector| check_vector(provider, vector)) {
            Ok(vector) => return Ok(vector),
            Err(failure) => {
                last_reason = failure.to_string();
                if attempt < max_attempts {
                    let delay_ms = policy.backoff_for(attempt);
                    warn!(
                        paper_id = %paper_id,
                        attempt,
                        delay_ms,
                        error = %failure,
                        "embedding call failed; retrying"
                    );
                    if delay_ms > 0 {
                        thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }
    }

    Err(EvalError::EmbeddingProviderFailure {
        paper_id: paper_id.to_string(),
        attempts: max_attempts,
        reason: last_reason,
    })
}

/// A vector of the wrong length or with NaN/inf components counts as a
/// failed call.
fn check_vector(
    provider: &dyn EmbeddingProvider,
    vector: Vec<f32>,
) -> Result<Vec<f32>, EmbeddingFailure> {
    let expected = provider.dimensions();
    if vector.len() != expected {
        return Err(EmbeddingFailure::new(
            provider.model_id(),
            format!("returned {} dimensions, expected {expected}", vector.len()),
        ));
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbeddingFailure::new(
            provider.model_id(),
            "returned a non-finite component",
        ));
    }
    Ok(vector)
}

/// Greedy, non-exclusive best match of every reference unit.
///
/// A generated unit may satisfy several reference units. An empty reference
/// scores 1.0 on both axes; an empty generated side against a non-empty
/// reference scores 0.0.
pub fn match_units(
    generated: &[SemanticUnit],
    reference: &[SemanticUnit],
    scoring: &MatchScoring,
) -> MatchResult {
    if reference.is_empty() {
        return MatchResult {
            matches: Vec::new(),
            similarity: 1.0,
            coverage: 1.0,
            matched_count: 0,
        };
    }

    let matches = reference
        .iter()
        .map(|reference_unit| best_match(reference_unit, generated, scoring.scale))
        .collect::<Vec<UnitMatch>>();

    let matched_count = matches
        .iter()
        .filter(|unit_match| {
            unit_match.generated_index.is_some() && unit_match.score >= scoring.coverage_threshold
        })
        .count();
    let total = matches.len() as f64;
    let similarity = matches.iter().map(|unit_match| unit_match.score).sum::<f64>() / total;

    MatchResult {
        similarity: similarity.clamp(0.0, 1.0),
        coverage: matched_count as f64 / total,
        matched_count,
        matches,
    }
}

fn best_match(
    reference_unit: &SemanticUnit,
    generated: &[SemanticUnit],
    scale: SimilarityScale,
) -> UnitMatch {
    let mut best = UnitMatch {
        generated_index: None,
        score: 0.0,
    };

    // Ties keep the earliest generated unit.
    for (generated_index, generated_unit) in generated.iter().enumerate() {
        let score = scale.apply(cosine_similarity(
            &reference_unit.vector,
            &generated_unit.vector,
        ));
        if best.generated_index.is_none() || score > best.score {
            best.generated_index = Some(generated_index);
            best.score = score;
        }
    }

    best
}
