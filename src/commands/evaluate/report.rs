use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::aggregate::{CorpusSummary, FieldShare};
use super::rebuttal::SignificanceFlag;
use super::run::{CorpusEvaluation, PaperOutcome};
use crate::config::EvalConfig;
use crate::model::{Phase, ReviewField};
use crate::semantic::{EmbeddingCacheStats, SemanticModelConfig};
use crate::util::{format_percent, format_signed_percent, utc_compact_string};

pub const REPORT_MANIFEST_VERSION: u32 = 1;

/// Average reduction rate above which the summary calls out a trend.
const NOTABLE_REDUCTION_RATE: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingReport {
    pub model: SemanticModelConfig,
    pub cache: EmbeddingCacheStats,
}

/// One row of the per-paper table. Rebuttal columns are only set on the
/// `updated` row of a paper that scored in both phases.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperRow {
    pub paper_id: String,
    pub phase: Phase,
    pub similarity_pct: f64,
    pub coverage_pct: f64,
    pub max_coverage_pct: f64,
    pub max_similarity_pct: f64,
    pub length: usize,
    pub avg_human_length: f64,
    pub length_ratio: f64,
    pub reference_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_delta_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_delta_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_delta: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<SignificanceFlag>,
}

/// Flat per-snapshot record for spreadsheet analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedRow {
    pub paper_id: String,
    pub phase: Phase,
    pub avg_similarity: f64,
    pub max_similarity: f64,
    pub avg_coverage: f64,
    pub max_coverage: f64,
    pub generated_length: usize,
    pub avg_human_length: f64,
    pub length_ratio: f64,
    pub has_summary: bool,
    pub has_strengths: bool,
    pub has_weaknesses: bool,
    pub has_suggestions: bool,
    pub strengths_count: usize,
    pub weaknesses_count: usize,
    pub suggestions_count: usize,
    pub human_reviews_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub runs_dir: String,
    pub config: EvalConfig,
    pub embedding: EmbeddingReport,
    pub rows: Vec<PaperRow>,
    pub papers: Vec<PaperOutcome>,
    pub summary: CorpusSummary,
}

impl EvaluationReport {
    pub fn build(
        evaluation: &CorpusEvaluation,
        config: &EvalConfig,
        model: SemanticModelConfig,
        cache: EmbeddingCacheStats,
        runs_dir: &Path,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            manifest_version: REPORT_MANIFEST_VERSION,
            run_id: format!("eval-{}", utc_compact_string(generated_at)),
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            runs_dir: runs_dir.display().to_string(),
            config: config.clone(),
            embedding: EmbeddingReport { model, cache },
            rows: evaluation.outcomes.iter().flat_map(paper_rows).collect(),
            papers: evaluation.outcomes.clone(),
            summary: evaluation.summary.clone(),
        }
    }
}

pub fn detailed_rows(report: &EvaluationReport) -> Vec<DetailedRow> {
    report
        .papers
        .iter()
        .flat_map(|paper| paper.scores.iter())
        .map(|score| DetailedRow {
            paper_id: score.paper_id.clone(),
            phase: score.phase,
            avg_similarity: score.similarity,
            max_similarity: score.max_similarity,
            avg_coverage: score.coverage,
            max_coverage: score.max_coverage,
            generated_length: score.length,
            avg_human_length: score.avg_human_length,
            length_ratio: score.length_ratio,
            has_summary: score.unit_counts.summary > 0,
            has_strengths: score.unit_counts.strengths > 0,
            has_weaknesses: score.unit_counts.weaknesses > 0,
            has_suggestions: score.unit_counts.suggestions > 0,
            strengths_count: score.item_counts.strengths,
            weaknesses_count: score.item_counts.weaknesses,
            suggestions_count: score.item_counts.suggestions,
            human_reviews_count: score.reference_count,
        })
        .collect()
}

pub fn write_detailed_csv(path: &Path, rows: &[DetailedRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row for paper {}", row.paper_id))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn paper_rows(outcome: &PaperOutcome) -> Vec<PaperRow> {
    outcome
        .scores
        .iter()
        .map(|score| {
            let impact = outcome
                .impact
                .as_ref()
                .filter(|_| score.phase == Phase::Updated);
            PaperRow {
                paper_id: score.paper_id.clone(),
                phase: score.phase,
                similarity_pct: score.similarity * 100.0,
                coverage_pct: score.coverage * 100.0,
                max_coverage_pct: score.max_coverage * 100.0,
                max_similarity_pct: score.max_similarity * 100.0,
                length: score.length,
                avg_human_length: score.avg_human_length,
                length_ratio: score.length_ratio,
                reference_count: score.reference_count,
                similarity_delta_pct: impact.map(|impact| impact.similarity_delta * 100.0),
                coverage_delta_pct: impact.map(|impact| impact.coverage_delta * 100.0),
                length_delta: impact.map(|impact| impact.length_delta),
                flags: impact.map(|impact| impact.flags.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

pub fn render_markdown(report: &EvaluationReport) -> Result<String> {
    let mut out = String::new();
    let summary = &report.summary;

    writeln!(out, "# Review Evaluation Summary")?;
    writeln!(out)?;
    writeln!(out, "**Generated on:** {}", report.generated_at)?;
    writeln!(out, "**Run:** `{}`", report.run_id)?;
    writeln!(out)?;

    writeln!(out, "## 📊 Overall Performance")?;
    writeln!(out)?;
    writeln!(out, "- **Papers evaluated:** {}", summary.total_papers)?;
    writeln!(out, "- **Total comparisons:** {}", summary.total_snapshots)?;
    writeln!(out, "- **Failed papers:** {}", summary.failed_papers.len())?;
    writeln!(out, "- **Average similarity:** {}", format_percent(summary.avg_similarity))?;
    writeln!(out, "- **Average coverage:** {}", format_percent(summary.avg_coverage))?;
    writeln!(
        out,
        "- **Average max coverage:** {}",
        format_percent(summary.avg_max_coverage)
    )?;
    writeln!(
        out,
        "- **Average max similarity:** {}",
        format_percent(summary.avg_max_similarity)
    )?;
    writeln!(
        out,
        "- **Average human review length:** {:.0} chars",
        summary.avg_human_length
    )?;
    for phase in &summary.phases {
        writeln!(
            out,
            "- **{}:** similarity {}, coverage {} ({} papers)",
            title_case(phase.phase.as_str()),
            format_percent(phase.avg_similarity),
            format_percent(phase.avg_coverage),
            phase.papers
        )?;
    }
    writeln!(out)?;

    writeln!(out, "### 🏗️ Structural Completeness")?;
    writeln!(out)?;
    for field in ReviewField::ALL {
        let share = summary.structural_completeness.get(field);
        writeln!(
            out,
            "- **Has {}:** {}/{} ({})",
            title_case(field.as_str()),
            share.count,
            share.total,
            format_percent(share.fraction)
        )?;
    }
    writeln!(out)?;

    // Units are segmented sentences; items are the raw list entries.
    writeln!(out, "### 📝 Content Count Averages")?;
    writeln!(out)?;
    let units = &summary.content_counts;
    let items = &summary.item_counts;
    writeln!(out, "- **Average Summary Sentences:** {:.1}", units.summary)?;
    for (label, unit_mean, item_mean) in [
        ("Strengths", units.strengths, items.strengths),
        ("Weaknesses", units.weaknesses, items.weaknesses),
        ("Suggestions", units.suggestions, items.suggestions),
    ] {
        writeln!(
            out,
            "- **Average {label}:** {unit_mean:.1} points ({item_mean:.1} listed items)"
        )?;
    }
    writeln!(out)?;

    writeln!(out, "## 📄 Per-Paper Results")?;
    writeln!(out)?;
    for paper in &report.papers {
        render_paper(&mut out, paper)?;
    }

    render_insights(&mut out, summary)?;
    render_rebuttal(&mut out, summary)?;
    render_failures(&mut out, summary)?;
    render_recommendations(&mut out, summary)?;

    writeln!(out, "---")?;
    writeln!(out, "*Generated by review-eval*")?;
    Ok(out)
}

fn render_paper(out: &mut String, paper: &PaperOutcome) -> Result<()> {
    writeln!(out, "### Paper {}", paper.paper_id)?;
    writeln!(out)?;

    match paper.scores.as_slice() {
        [] => {}
        [score] => {
            writeln!(out, "- **Phase:** {}", title_case(score.phase.as_str()))?;
            writeln!(out, "- **Similarity:** {}", format_percent(score.similarity))?;
            writeln!(out, "- **Coverage:** {}", format_percent(score.coverage))?;
            writeln!(
                out,
                "- **Max similarity:** {}",
                format_percent(score.max_similarity)
            )?;
            writeln!(
                out,
                "- **Generated length:** {} characters ({:.2}x human average)",
                score.length, score.length_ratio
            )?;
            writeln!(out, "- **Human reviews:** {}", score.reference_count)?;
            writeln!(out)?;
        }
        scores => {
            writeln!(
                out,
                "| Review Type | Similarity | Coverage | Length | Human Reviews |"
            )?;
            writeln!(
                out,
                "|-------------|------------|----------|---------|---------------|"
            )?;
            for score in scores {
                writeln!(
                    out,
                    "| {} | {} | {} | {} chars | {} |",
                    title_case(score.phase.as_str()),
                    format_percent(score.similarity),
                    format_percent(score.coverage),
                    score.length,
                    score.reference_count
                )?;
            }
            writeln!(out)?;
        }
    }

    if let Some(impact) = &paper.impact {
        writeln!(out, "#### 🔄 Rebuttal Impact")?;
        writeln!(out)?;
        writeln!(
            out,
            "- **Similarity change:** {}",
            format_signed_percent(impact.similarity_delta)
        )?;
        writeln!(
            out,
            "- **Coverage change:** {}",
            format_signed_percent(impact.coverage_delta)
        )?;
        writeln!(out, "- **Length change:** {:+} chars", impact.length_delta)?;
        for flag in &impact.flags {
            let marker = if flag.is_positive() { "✅" } else { "⚠️" };
            writeln!(out, "- {marker} **{}**", flag.label())?;
        }
        writeln!(out)?;
    }

    for failure in &paper.failures {
        let phase = failure.phase.map(Phase::as_str).unwrap_or("paper");
        writeln!(out, "- ❌ **{phase}** ({}): {}", failure.kind, failure.reason)?;
    }
    if !paper.failures.is_empty() {
        writeln!(out)?;
    }

    Ok(())
}

fn render_insights(out: &mut String, summary: &CorpusSummary) -> Result<()> {
    let Some(extrema) = &summary.extrema else {
        return Ok(());
    };

    writeln!(out, "## 💡 Key Insights")?;
    writeln!(out)?;
    for (label, extremum) in [
        ("Highest similarity", &extrema.highest_similarity),
        ("Lowest similarity", &extrema.lowest_similarity),
        ("Best coverage", &extrema.best_coverage),
        ("Worst coverage", &extrema.worst_coverage),
    ] {
        writeln!(
            out,
            "- **{label}:** {} ({}) ({})",
            extremum.paper_id,
            extremum.phase,
            format_percent(extremum.value)
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_rebuttal(out: &mut String, summary: &CorpusSummary) -> Result<()> {
    let rebuttal = &summary.rebuttal;
    if rebuttal.papers_with_rebuttal == 0 {
        return Ok(());
    }

    writeln!(out, "### 🔄 Overall Rebuttal Impact")?;
    writeln!(out)?;
    writeln!(out, "- **Papers with rebuttal:** {}", rebuttal.papers_with_rebuttal)?;
    writeln!(
        out,
        "- **Average similarity change:** {}",
        format_signed_percent(rebuttal.mean_similarity_delta)
    )?;
    writeln!(
        out,
        "- **Average coverage change:** {}",
        format_signed_percent(rebuttal.mean_coverage_delta)
    )?;
    writeln!(out, "- **Average length change:** {:+.1} chars", rebuttal.mean_length_delta)?;
    for flag in SignificanceFlag::ALL {
        writeln!(
            out,
            "- **{}:** {} papers",
            flag.label(),
            rebuttal.flag_counts.get(flag)
        )?;
    }
    for (label, significance) in [
        ("Coverage", &rebuttal.coverage_significance),
        ("Similarity", &rebuttal.similarity_significance),
    ] {
        let p_value = significance
            .sign_test_p_value
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "n/a".to_string());
        let interval = match (significance.ci95_low, significance.ci95_high) {
            (Some(low), Some(high)) => {
                format!("[{}, {}]", format_signed_percent(low), format_signed_percent(high))
            }
            _ => "n/a".to_string(),
        };
        writeln!(
            out,
            "- **{label} delta significance:** sign test p={p_value}, 95% CI {interval}"
        )?;
    }
    writeln!(out)?;

    writeln!(out, "#### 📊 Content Changes After Rebuttal")?;
    writeln!(out, "- **Strengths change:** {:+.1}", rebuttal.mean_strengths_change)?;
    writeln!(out, "- **Weaknesses change:** {:+.1}", rebuttal.mean_weaknesses_change)?;
    writeln!(out, "- **Suggestions change:** {:+.1}", rebuttal.mean_suggestions_change)?;
    writeln!(
        out,
        "- **Weaknesses reduction rate:** {}",
        format_percent(rebuttal.mean_weaknesses_reduction_rate)
    )?;
    writeln!(
        out,
        "- **Suggestions reduction rate:** {}",
        format_percent(rebuttal.mean_suggestions_reduction_rate)
    )?;
    if rebuttal.mean_weaknesses_reduction_rate > NOTABLE_REDUCTION_RATE {
        writeln!(out, "- ✅ **Significant weakness reduction after rebuttal**")?;
    }
    if rebuttal.mean_suggestions_reduction_rate > NOTABLE_REDUCTION_RATE {
        writeln!(out, "- ✅ **Significant suggestion reduction after rebuttal**")?;
    }
    if rebuttal.mean_coverage_delta > 0.0 {
        writeln!(out, "- ✅ **Rebuttals generally improved coverage**")?;
    } else {
        writeln!(out, "- ⚠️ **Rebuttals generally decreased coverage**")?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_failures(out: &mut String, summary: &CorpusSummary) -> Result<()> {
    if summary.failures.is_empty() {
        return Ok(());
    }

    writeln!(out, "## ❌ Failures")?;
    writeln!(out)?;
    writeln!(out, "| Paper | Phase | Kind | Reason |")?;
    writeln!(out, "|-------|-------|------|--------|")?;
    for failure in &summary.failures {
        writeln!(
            out,
            "| {} | {} | {} | {} |",
            failure.paper_id,
            failure.phase.map(Phase::as_str).unwrap_or("-"),
            failure.kind,
            failure.reason.replace('|', "\\|")
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_recommendations(out: &mut String, summary: &CorpusSummary) -> Result<()> {
    if summary.total_snapshots == 0 {
        return Ok(());
    }

    writeln!(out, "## 🎯 Recommendations")?;
    writeln!(out)?;
    if summary.avg_similarity < 0.5 {
        writeln!(
            out,
            "- 🔍 **Low similarity scores** - Consider improving review content alignment with human reviewers"
        )?;
    }
    if summary.avg_coverage < 0.6 {
        writeln!(
            out,
            "- 📝 **Low coverage scores** - Generated reviews may be missing key points from human reviews"
        )?;
    }

    let gaps = ReviewField::ALL
        .into_iter()
        .filter(|field| has_structural_gap(summary.structural_completeness.get(*field)))
        .map(ReviewField::as_str)
        .collect::<Vec<_>>();
    if !gaps.is_empty() {
        writeln!(
            out,
            "- 🏗️ **Structural gaps** - Some reviews missing: {}",
            gaps.join(", ")
        )?;
    } else if summary.avg_similarity > 0.6 && summary.avg_coverage > 0.7 {
        writeln!(
            out,
            "- ✅ **Strong performance** - Reviews show good alignment with human evaluations"
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn has_structural_gap(share: &FieldShare) -> bool {
    (share.count as f64) < share.total as f64 * 0.8
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
