use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Original,
    Updated,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Original, Phase::Updated];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Updated => "updated",
        }
    }

    pub fn review_file_name(self) -> &'static str {
        match self {
            Self::Original => "review_original.json",
            Self::Updated => "review_updated.json",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewField {
    Summary,
    Strengths,
    Weaknesses,
    Suggestions,
}

impl ReviewField {
    pub const ALL: [ReviewField; 4] = [
        ReviewField::Summary,
        ReviewField::Strengths,
        ReviewField::Weaknesses,
        ReviewField::Suggestions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Strengths => "strengths",
            Self::Weaknesses => "weaknesses",
            Self::Suggestions => "suggestions",
        }
    }
}

/// A list item: either a bare string or a point object carrying grounding
/// and facet metadata from the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReviewPoint {
    Text(String),
    Detailed {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grounding: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        facet: Option<String>,
    },
}

impl ReviewPoint {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Detailed { text, .. } => text,
        }
    }
}

impl From<&str> for ReviewPoint {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One reviewer's opinion of a paper, human or generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default, alias = "rid", skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
    pub summary: String,
    pub strengths: Vec<ReviewPoint>,
    pub weaknesses: Vec<ReviewPoint>,
    pub suggestions: Vec<ReviewPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
}

impl ReviewRecord {
    pub fn points(&self, field: ReviewField) -> &[ReviewPoint] {
        match field {
            ReviewField::Summary => &[],
            ReviewField::Strengths => &self.strengths,
            ReviewField::Weaknesses => &self.weaknesses,
            ReviewField::Suggestions => &self.suggestions,
        }
    }

    /// Summary then every item, one per line, blank parts dropped.
    pub fn render_text(&self) -> String {
        let mut parts = Vec::<&str>::new();
        let summary = self.summary.trim();
        if !summary.is_empty() {
            parts.push(summary);
        }
        for point in self
            .strengths
            .iter()
            .chain(&self.weaknesses)
            .chain(&self.suggestions)
        {
            let text = point.text().trim();
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts.join("\n")
    }

    pub fn rendered_length(&self) -> usize {
        self.render_text().chars().count()
    }

    pub fn item_counts(&self) -> FieldCounts {
        FieldCounts {
            summary: usize::from(!self.summary.trim().is_empty()),
            strengths: self.strengths.len(),
            weaknesses: self.weaknesses.len(),
            suggestions: self.suggestions.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldCounts {
    pub summary: usize,
    pub strengths: usize,
    pub weaknesses: usize,
    pub suggestions: usize,
}

impl FieldCounts {
    pub fn get(&self, field: ReviewField) -> usize {
        match field {
            ReviewField::Summary => self.summary,
            ReviewField::Strengths => self.strengths,
            ReviewField::Weaknesses => self.weaknesses,
            ReviewField::Suggestions => self.suggestions,
        }
    }
}

/// A generated review pinned to one phase of one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSnapshot {
    pub paper_id: String,
    pub phase: Phase,
    pub record: ReviewRecord,
}

/// Human reviews for one paper, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    pub paper_id: String,
    pub references: Vec<ReviewRecord>,
}

impl ReferenceSet {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn reviewer_label(&self, index: usize) -> String {
        self.references
            .get(index)
            .and_then(|record| record.reviewer_id.clone())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("reviewer_{index}"))
    }
}
