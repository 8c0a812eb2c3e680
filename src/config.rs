use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::semantic::{DEFAULT_EMBEDDING_DIM, DEFAULT_MODEL_ID};

/// How a raw cosine in [-1, 1] is mapped onto the [0, 1] scoring scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityScale {
    /// `max(0, cos)`; unrelated units score near zero.
    Clamped,
    /// `(cos + 1) / 2`; the sentence-transformer convention.
    Shifted,
}

impl SimilarityScale {
    pub fn apply(self, cosine: f64) -> f64 {
        let scaled = match self {
            Self::Clamped => cosine,
            Self::Shifted => (cosine + 1.0) / 2.0,
        };
        if scaled.is_nan() {
            0.0
        } else {
            scaled.clamp(0.0, 1.0)
        }
    }
}

/// Signed fraction deltas (0.05 == 5 percentage points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceThresholds {
    pub coverage_delta: f64,
    pub similarity_improvement: f64,
    pub similarity_regression: f64,
}

impl Default for SignificanceThresholds {
    fn default() -> Self {
        Self {
            coverage_delta: 0.05,
            similarity_improvement: 0.01,
            similarity_regression: 0.015,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling and capped.
    pub fn backoff_for(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff_ms
            .saturating_mul(1_u64 << shift)
            .min(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub coverage_threshold: f64,
    pub similarity_scale: SimilarityScale,
    pub summary_weight: f64,
    pub significance: SignificanceThresholds,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub embedding_model_id: String,
    pub embedding_dimensions: usize,
    pub bootstrap_iterations: usize,
    pub bootstrap_seed: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.5,
            similarity_scale: SimilarityScale::Clamped,
            summary_weight: 0.0,
            significance: SignificanceThresholds::default(),
            retry: RetryPolicy::default(),
            workers: 4,
            embedding_model_id: DEFAULT_MODEL_ID.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIM,
            bootstrap_iterations: 1_000,
            bootstrap_seed: 0xC0FFEE,
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("coverage_threshold", self.coverage_threshold),
            ("summary_weight", self.summary_weight),
            ("significance.coverage_delta", self.significance.coverage_delta),
            (
                "significance.similarity_improvement",
                self.significance.similarity_improvement,
            ),
            (
                "significance.similarity_regression",
                self.significance.similarity_regression,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }

        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.embedding_dimensions == 0 {
            bail!("embedding_dimensions must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.embedding_model_id.trim().is_empty() {
            bail!("embedding_model_id must not be empty");
        }

        Ok(())
    }
}

pub fn load_eval_config(path: Option<&Path>) -> Result<EvalConfig> {
    let Some(path) = path else {
        return Ok(EvalConfig::default());
    };

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config: EvalConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse eval config {}", path.display()))?;
    Ok(config)
}
