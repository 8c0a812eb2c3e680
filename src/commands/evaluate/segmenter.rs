use regex::Regex;

use crate::error::EvalError;
use crate::model::{FieldCounts, ReferenceSet, ReviewField, ReviewRecord};
use crate::semantic::normalize_whitespace;

/// An atomic piece of review text, not yet embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCandidate {
    pub field: ReviewField,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentedReview {
    pub summary: Vec<UnitCandidate>,
    pub strengths: Vec<UnitCandidate>,
    pub weaknesses: Vec<UnitCandidate>,
    pub suggestions: Vec<UnitCandidate>,
}

impl SegmentedReview {
    /// Strengths, weaknesses and suggestions in that order; the summary is
    /// scored separately.
    pub fn points(&self) -> impl Iterator<Item = &UnitCandidate> {
        self.strengths
            .iter()
            .chain(&self.weaknesses)
            .chain(&self.suggestions)
    }

    pub fn unit_counts(&self) -> FieldCounts {
        FieldCounts {
            summary: self.summary.len(),
            strengths: self.strengths.len(),
            weaknesses: self.weaknesses.len(),
            suggestions: self.suggestions.len(),
        }
    }
}

pub struct TextSegmenter {
    sentence_boundary: Regex,
    bullet_marker: Regex,
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSegmenter {
    pub fn new() -> Self {
        Self {
            sentence_boundary: Regex::new(r#"[.!?]+["')\]]*\s+"#)
                .expect("valid sentence boundary regex"),
            bullet_marker: Regex::new(r"^(?:[-*\u{2022}]|\(?\d{1,3}[.)])\s+")
                .expect("valid bullet marker regex"),
        }
    }

    /// Bullet fields yield one unit per non-blank item; the summary is split
    /// on sentence boundaries. Blank fields yield no units.
    pub fn segment(&self, record: &ReviewRecord) -> SegmentedReview {
        SegmentedReview {
            summary: self
                .split_sentences(&record.summary)
                .into_iter()
                .map(|text| UnitCandidate {
                    field: ReviewField::Summary,
                    text,
                })
                .collect(),
            strengths: self.bullet_units(record, ReviewField::Strengths),
            weaknesses: self.bullet_units(record, ReviewField::Weaknesses),
            suggestions: self.bullet_units(record, ReviewField::Suggestions),
        }
    }

    pub fn split_sentences(&self, text: &str) -> Vec<String> {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut sentences = Vec::<String>::new();
        let mut start = 0usize;
        for boundary in self.sentence_boundary.find_iter(&normalized) {
            push_trimmed(&mut sentences, &normalized[start..boundary.end()]);
            start = boundary.end();
        }
        push_trimmed(&mut sentences, &normalized[start..]);
        sentences
    }

    fn bullet_units(&self, record: &ReviewRecord, field: ReviewField) -> Vec<UnitCandidate> {
        record
            .points(field)
            .iter()
            .filter_map(|point| {
                let normalized = normalize_whitespace(point.text());
                let text = self.bullet_marker.replace(&normalized, "").trim().to_string();
                (!text.is_empty()).then_some(UnitCandidate { field, text })
            })
            .collect()
    }
}

fn push_trimmed(out: &mut Vec<String>, value: &str) {
    let trimmed = value.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Parses one review record, attributing shape errors to `(paper_id, record)`.
pub fn parse_review_record(
    raw: &str,
    paper_id: &str,
    record: &str,
) -> Result<ReviewRecord, EvalError> {
    serde_json::from_str::<ReviewRecord>(raw).map_err(|error| EvalError::MalformedReviewRecord {
        paper_id: paper_id.to_string(),
        record: record.to_string(),
        reason: error.to_string(),
    })
}

/// Parses a JSON array of human reviews; each element is checked on its own
/// so the failure names the offending reference.
pub fn parse_reference_set(raw: &str, paper_id: &str) -> Result<ReferenceSet, EvalError> {
    let malformed = |record: String, reason: String| EvalError::MalformedReviewRecord {
        paper_id: paper_id.to_string(),
        record,
        reason,
    };

    let values = serde_json::from_str::<Vec<serde_json::Value>>(raw)
        .map_err(|error| malformed("references".to_string(), error.to_string()))?;

    let mut references = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let record = serde_json::from_value::<ReviewRecord>(value)
            .map_err(|error| malformed(format!("reference[{index}]"), error.to_string()))?;
        references.push(record);
    }

    Ok(ReferenceSet {
        paper_id: paper_id.to_string(),
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReviewPoint;

    fn record(summary: &str, strengths: &[&str], weaknesses: &[&str]) -> ReviewRecord {
        ReviewRecord {
            reviewer_id: None,
            summary: summary.to_string(),
            strengths: strengths.iter().map(|s| ReviewPoint::from(*s)).collect(),
            weaknesses: weaknesses.iter().map(|s| ReviewPoint::from(*s)).collect(),
            suggestions: vec![],
            questions: vec![],
            scores: None,
            overall: None,
            confidence: None,
        }
    }

    #[test]
    fn summary_splits_on_sentence_boundaries() {
        let segmenter = TextSegmenter::new();
        let sentences = segmenter.split_sentences(
            "The paper proposes X.  It evaluates on three tasks! Does it generalize? (Unclear.) Final",
        );
        assert_eq!(
            sentences,
            vec![
                "The paper proposes X.",
                "It evaluates on three tasks!",
                "Does it generalize?",
                "(Unclear.)",
                "Final",
            ]
        );
    }

    #[test]
    fn decimal_numbers_do_not_split_sentences() {
        let segmenter = TextSegmenter::new();
        let sentences = segmenter.split_sentences("Accuracy rises to 91.5 on MNLI. Good.");
        assert_eq!(sentences, vec!["Accuracy rises to 91.5 on MNLI.", "Good."]);
    }

    #[test]
    fn bullets_become_units_with_markers_stripped() {
        let segmenter = TextSegmenter::new();
        let review = record(
            "",
            &["- Clear writing", "2) Strong   baselines", "   "],
            &["\u{2022} Small dataset"],
        );

        let segmented = segmenter.segment(&review);
        let strengths = segmented
            .strengths
            .iter()
            .map(|unit| unit.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(strengths, vec!["Clear writing", "Strong baselines"]);
        assert_eq!(segmented.weaknesses[0].text, "Small dataset");
        assert_eq!(segmented.weaknesses[0].field, ReviewField::Weaknesses);
        assert!(segmented.summary.is_empty());
        assert_eq!(segmented.points().count(), 3);
    }

    #[test]
    fn empty_review_yields_no_units() {
        let segmenter = TextSegmenter::new();
        let segmented = segmenter.segment(&record("   ", &[], &["", "  "]));
        assert_eq!(segmented, SegmentedReview::default());
        assert_eq!(segmented.unit_counts(), FieldCounts::default());
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let raw = r#"{ "summary": "ok", "strengths": [], "suggestions": [] }"#;
        let error = parse_review_record(raw, "12", "original").expect_err("must fail fast");
        match error {
            EvalError::MalformedReviewRecord {
                paper_id,
                record,
                reason,
            } => {
                assert_eq!(paper_id, "12");
                assert_eq!(record, "original");
                assert!(reason.contains("weaknesses"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn point_without_text_is_malformed() {
        let raw = r#"{
            "summary": "",
            "strengths": [{"grounding": "Sec 2"}],
            "weaknesses": [],
            "suggestions": []
        }"#;
        assert!(matches!(
            parse_review_record(raw, "3", "updated"),
            Err(EvalError::MalformedReviewRecord { .. })
        ));
    }

    #[test]
    fn reference_set_failure_names_the_reference() {
        let raw = r#"[
            { "summary": "a", "strengths": [], "weaknesses": [], "suggestions": [] },
            { "summary": "b", "strengths": "not a list", "weaknesses": [], "suggestions": [] }
        ]"#;

        let error = parse_reference_set(raw, "5").expect_err("second reference is malformed");
        assert!(matches!(
            error,
            EvalError::MalformedReviewRecord { ref record, .. } if record == "reference[1]"
        ));
    }

    #[test]
    fn reference_set_parses_all_entries() {
        let raw = r#"[
            {
                "reviewer_id": "R1",
                "summary": "a",
                "strengths": ["x"],
                "weaknesses": [],
                "suggestions": []
            },
            { "summary": "b", "strengths": [], "weaknesses": ["y"], "suggestions": [] }
        ]"#;
        let set = parse_reference_set(raw, "5").expect("references should parse");
        assert_eq!(set.len(), 2);
        assert_eq!(set.reviewer_label(0), "R1");
        assert_eq!(set.reviewer_label(1), "reviewer_1");
    }
}
