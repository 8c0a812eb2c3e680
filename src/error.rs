use serde::Serialize;

use crate::model::Phase;

/// Per-paper evaluation failures.
///
/// None of these abort a corpus run: they are attributed to a paper (and a
/// phase where one applies), collected, and reported next to the partial
/// results.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("paper {paper_id} has no human reference reviews")]
    ReferenceSetEmpty { paper_id: String },

    #[error("embedding provider failed for paper {paper_id} after {attempts} attempt(s): {reason}")]
    EmbeddingProviderFailure {
        paper_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("malformed review record for paper {paper_id} ({record}): {reason}")]
    MalformedReviewRecord {
        paper_id: String,
        record: String,
        reason: String,
    },

    #[error("paper {paper_id} has no generated review in {path}")]
    MissingSnapshot { paper_id: String, path: String },
}

impl EvalError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReferenceSetEmpty { .. } => "reference_set_empty",
            Self::EmbeddingProviderFailure { .. } => "embedding_provider_failure",
            Self::MalformedReviewRecord { .. } => "malformed_review_record",
            Self::MissingSnapshot { .. } => "missing_snapshot",
        }
    }

    pub fn paper_id(&self) -> &str {
        match self {
            Self::ReferenceSetEmpty { paper_id }
            | Self::EmbeddingProviderFailure { paper_id, .. }
            | Self::MalformedReviewRecord { paper_id, .. }
            | Self::MissingSnapshot { paper_id, .. } => paper_id,
        }
    }
}

/// Error surfaced by an embedding provider for a single call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{provider}: {reason}")]
pub struct EmbeddingFailure {
    pub provider: String,
    pub reason: String,
}

impl EmbeddingFailure {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// A failure row as it appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PaperFailure {
    pub paper_id: String,
    pub phase: Option<Phase>,
    pub kind: String,
    pub reason: String,
}

impl PaperFailure {
    pub fn from_error(phase: Option<Phase>, error: &EvalError) -> Self {
        Self {
            paper_id: error.paper_id().to_string(),
            phase,
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}
