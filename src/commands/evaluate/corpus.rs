use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use super::segmenter::{parse_reference_set, parse_review_record};
use crate::error::{EvalError, PaperFailure};
use crate::model::{Phase, ReferenceSet, ReviewSnapshot};

const LEGACY_REVIEW_FILE: &str = "review.json";
const HUMAN_REVIEWS_FILE: &str = "human_reviews.json";

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub paper_ids: Vec<String>,
    pub latest_only: bool,
    pub include_all_dirs: bool,
    /// Skip directories last modified before this instant.
    pub modified_since: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperDir {
    pub paper_id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Everything read from one paper directory, plus whatever failed to load.
#[derive(Debug, Clone)]
pub struct PaperInput {
    pub paper_id: String,
    pub source_dir: PathBuf,
    pub snapshots: Vec<ReviewSnapshot>,
    pub references: Option<ReferenceSet>,
    pub load_failures: Vec<PaperFailure>,
}

pub struct PaperIdParser {
    leading: Regex,
    trailing: Regex,
}

impl Default for PaperIdParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperIdParser {
    pub fn new() -> Self {
        Self {
            leading: Regex::new(r"^paper_([A-Za-z0-9.\-]+)(?:_|$)")
                .expect("valid leading paper id regex"),
            trailing: Regex::new(r"_paper_([A-Za-z0-9.\-]+)$")
                .expect("valid trailing paper id regex"),
        }
    }

    /// `paper_<id>[_...]` and `<prefix>_paper_<id>` both resolve to `<id>`.
    pub fn parse(&self, dir_name: &str) -> Option<String> {
        self.leading
            .captures(dir_name)
            .or_else(|| self.trailing.captures(dir_name))
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    }
}

pub fn discover_paper_dirs(runs_dir: &Path, options: &DiscoveryOptions) -> Result<Vec<PaperDir>> {
    let parser = PaperIdParser::new();
    let entries =
        fs::read_dir(runs_dir).with_context(|| format!("failed to read {}", runs_dir.display()))?;

    let mut dirs = Vec::<PaperDir>::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", runs_dir.display()))?;
        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        if !metadata.is_dir() {
            continue;
        }

        let Some(dir_name) = path.file_name().and_then(|name| name.to_str()) else {
            warn!(path = %path.display(), "skipping directory with non UTF-8 name");
            continue;
        };
        let paper_id = match parser.parse(dir_name) {
            Some(paper_id) => paper_id,
            None if options.include_all_dirs => dir_name.to_string(),
            None => {
                debug!(dir = %dir_name, "skipping directory without paper id");
                continue;
            }
        };

        if !options.paper_ids.is_empty() && !options.paper_ids.contains(&paper_id) {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if options.modified_since.is_some_and(|cutoff| modified < cutoff) {
            debug!(dir = %dir_name, "skipping directory older than cutoff");
            continue;
        }

        dirs.push(PaperDir {
            paper_id,
            path,
            modified,
        });
    }

    let mut by_id = BTreeMap::<String, Vec<PaperDir>>::new();
    for dir in dirs {
        by_id.entry(dir.paper_id.clone()).or_default().push(dir);
    }

    let mut selected = Vec::new();
    for (paper_id, mut candidates) in by_id {
        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.path.cmp(&b.path)));
        if options.latest_only || candidates.len() == 1 {
            if let Some(latest) = candidates.pop() {
                selected.push(latest);
            }
            continue;
        }

        // Several runs of one paper: each keeps its own directory name as id.
        warn!(
            paper_id = %paper_id,
            runs = candidates.len(),
            "paper has several run directories; pass --latest-only to keep one"
        );
        for mut candidate in candidates {
            if let Some(name) = candidate.path.file_name().and_then(|name| name.to_str()) {
                candidate.paper_id = name.to_string();
            }
            selected.push(candidate);
        }
    }

    selected.sort_by(|a, b| a.paper_id.cmp(&b.paper_id).then(a.path.cmp(&b.path)));
    Ok(selected)
}

/// Reads one paper directory. Never fails as a whole: unreadable or malformed
/// files become failures attributed to the paper and phase.
pub fn load_paper(dir: &PaperDir) -> PaperInput {
    let paper_id = dir.paper_id.as_str();
    let mut snapshots = Vec::new();
    let mut load_failures = Vec::new();

    let phase_files = Phase::ALL
        .iter()
        .map(|phase| (*phase, dir.path.join(phase.review_file_name())))
        .filter(|(_, path)| path.is_file())
        .collect::<Vec<_>>();
    let phase_files = if phase_files.is_empty() {
        let legacy = dir.path.join(LEGACY_REVIEW_FILE);
        if legacy.is_file() {
            vec![(Phase::Original, legacy)]
        } else {
            Vec::new()
        }
    } else {
        phase_files
    };

    if phase_files.is_empty() {
        load_failures.push(PaperFailure::from_error(
            None,
            &EvalError::MissingSnapshot {
                paper_id: paper_id.to_string(),
                path: dir.path.display().to_string(),
            },
        ));
    }

    for (phase, path) in phase_files {
        let parsed = read_record_file(&path, paper_id, phase.as_str())
            .and_then(|raw| parse_review_record(&raw, paper_id, phase.as_str()));
        match parsed {
            Ok(record) => snapshots.push(ReviewSnapshot {
                paper_id: paper_id.to_string(),
                phase,
                record,
            }),
            Err(error) => load_failures.push(PaperFailure::from_error(Some(phase), &error)),
        }
    }

    let references_path = dir.path.join(HUMAN_REVIEWS_FILE);
    let references = if references_path.is_file() {
        match read_record_file(&references_path, paper_id, "references")
            .and_then(|raw| parse_reference_set(&raw, paper_id))
        {
            Ok(references) => Some(references),
            Err(error) => {
                load_failures.push(PaperFailure::from_error(None, &error));
                None
            }
        }
    } else {
        debug!(paper_id = %paper_id, "no human reviews file");
        Some(ReferenceSet {
            paper_id: paper_id.to_string(),
            references: Vec::new(),
        })
    };

    PaperInput {
        paper_id: paper_id.to_string(),
        source_dir: dir.path.clone(),
        snapshots,
        references,
        load_failures,
    }
}

fn read_record_file(path: &Path, paper_id: &str, record: &str) -> Result<String, EvalError> {
    fs::read_to_string(path).map_err(|error| EvalError::MalformedReviewRecord {
        paper_id: paper_id.to_string(),
        record: record.to_string(),
        reason: format!("failed to read {}: {error}", path.display()),
    })
}
