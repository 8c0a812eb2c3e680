use std::fs;
use std::path::PathBuf;

use super::aggregate::FlagCounts;
use super::corpus::PaperInput;
use super::matcher::{EmbeddingContext, MatchScoring};
use super::rebuttal::analyze_rebuttal;
use super::run::{evaluate_corpus, run};
use super::scorer::PaperScorer;
use super::segmenter::TextSegmenter;
use super::test_support::{LookupEmbedder, PoisonedEmbedder, review, snapshot};
use crate::cli::{ConfigOverrides, EvaluateArgs};
use crate::config::{EvalConfig, RetryPolicy, SimilarityScale};
use crate::model::{Phase, ReferenceSet, ReviewRecord, ReviewSnapshot};
use crate::semantic::{EmbeddingCache, LocalHashEmbedder};

fn scoring() -> MatchScoring {
    MatchScoring {
        coverage_threshold: 0.5,
        scale: SimilarityScale::Clamped,
    }
}

fn no_wait_config() -> EvalConfig {
    EvalConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            backoff_ms: 0,
            max_backoff_ms: 0,
        },
        bootstrap_iterations: 100,
        ..EvalConfig::default()
    }
}

fn input(
    paper_id: &str,
    snapshots: Vec<ReviewSnapshot>,
    references: Vec<ReviewRecord>,
) -> PaperInput {
    PaperInput {
        paper_id: paper_id.to_string(),
        source_dir: PathBuf::from(format!("runs/paper_{paper_id}")),
        snapshots,
        references: Some(ReferenceSet {
            paper_id: paper_id.to_string(),
            references,
        }),
        load_failures: vec![],
    }
}

fn three_point_provider() -> LookupEmbedder {
    LookupEmbedder::new(&[
        ("Clear writing", [1.0, 0.0, 0.0, 0.0]),
        ("Strong baselines", [0.0, 1.0, 0.0, 0.0]),
        ("Small dataset", [0.0, 0.0, 1.0, 0.0]),
        ("Evaluation data is limited", [0.0, 0.0, 0.4, 0.916_515]),
    ])
}

#[test]
fn paraphrase_below_threshold_counts_toward_similarity_only() {
    let provider = three_point_provider();
    let cache = EmbeddingCache::new();
    let retry = RetryPolicy::default();
    let segmenter = TextSegmenter::new();
    let scorer = PaperScorer::new(
        &segmenter,
        EmbeddingContext {
            provider: &provider,
            cache: &cache,
            retry: &retry,
        },
        scoring(),
        0.0,
    );

    let human = review("", &["Clear writing", "Strong baselines"], &["Small dataset"], &[]);
    let references = ReferenceSet {
        paper_id: "100".to_string(),
        references: vec![human.clone(), human.clone(), human],
    };
    let generated = review(
        "",
        &["Clear writing", "Strong baselines"],
        &["Evaluation data is limited"],
        &[],
    );

    let score = scorer
        .score(&snapshot("100", Phase::Original, generated), &references)
        .expect("score");

    assert!((score.coverage - 2.0 / 3.0).abs() < 1e-9, "coverage {}", score.coverage);
    assert!((score.max_coverage - 2.0 / 3.0).abs() < 1e-9);
    assert!(score.similarity > score.coverage);
    assert!((score.similarity - 0.8).abs() < 1e-6);
    assert_eq!(score.per_reference.len(), 3);
    assert!(score.per_reference.iter().all(|row| row.matched_units == 2));
    // Four distinct texts, each embedded once for the whole paper.
    assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[test]
fn identical_phases_have_zero_deltas_and_no_flags() {
    let provider = three_point_provider();
    let cache = EmbeddingCache::new();
    let config = no_wait_config();

    let generated = review("", &["Clear writing"], &["Evaluation data is limited"], &[]);
    let inputs = vec![input(
        "1",
        vec![
            snapshot("1", Phase::Original, generated.clone()),
            snapshot("1", Phase::Updated, generated),
        ],
        vec![review("", &["Clear writing", "Strong baselines"], &["Small dataset"], &[])],
    )];

    let evaluation = evaluate_corpus(&inputs, &provider, &config, &cache).expect("evaluation runs");
    let impact = evaluation.outcomes[0]
        .impact
        .as_ref()
        .expect("both phases scored");

    assert_eq!(impact.similarity_delta, 0.0);
    assert_eq!(impact.coverage_delta, 0.0);
    assert_eq!(impact.max_coverage_delta, 0.0);
    assert_eq!(impact.length_delta, 0);
    assert!(impact.flags.is_empty());
    assert_eq!(evaluation.summary.rebuttal.flag_counts, FlagCounts::default());
}

#[test]
fn dropping_unmatched_weaknesses_keeps_coverage() {
    let provider = LookupEmbedder::new(&[
        ("Clear writing", [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ("Small dataset", [0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
        ("No ablation study", [0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
        ("Typos in section 2", [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
        ("Figure 3 is blurry", [0.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        ("Missing related work", [0.0, 0.0, 0.0, 0.0, 0.0, 1.0]),
    ]);
    let cache = EmbeddingCache::new();
    let config = no_wait_config();

    let original = review(
        "",
        &["Clear writing"],
        &[
            "Small dataset",
            "No ablation study",
            "Typos in section 2",
            "Figure 3 is blurry",
            "Missing related work",
        ],
        &[],
    );
    let updated = review("", &["Clear writing"], &["Small dataset", "No ablation study"], &[]);
    let inputs = vec![input(
        "5",
        vec![
            snapshot("5", Phase::Original, original),
            snapshot("5", Phase::Updated, updated),
        ],
        vec![review(
            "",
            &["Clear writing"],
            &["Small dataset", "No ablation study"],
            &[],
        )],
    )];

    let evaluation = evaluate_corpus(&inputs, &provider, &config, &cache).expect("evaluation runs");
    let outcome = &evaluation.outcomes[0];
    let impact = outcome.impact.as_ref().expect("both phases scored");

    assert_eq!(outcome.scores[0].coverage, 1.0);
    assert_eq!(outcome.scores[1].coverage, 1.0);
    assert_eq!(impact.coverage_delta, 0.0);
    assert!(impact.length_delta < 0);
    assert_eq!(impact.weaknesses_change, -3);
    assert!((impact.weaknesses_reduction_rate - 0.6).abs() < 1e-12);
    assert!(!impact.flags.iter().any(|flag| !flag.is_positive()));
}

#[test]
fn provider_failure_stays_with_its_paper() {
    let provider = PoisonedEmbedder {
        inner: LocalHashEmbedder::default(),
        poison: "TIMEOUT",
    };
    let cache = EmbeddingCache::new();
    let config = no_wait_config();
    let human = review("Solid paper.", &["Clear writing"], &["Small dataset"], &[]);

    let inputs = vec![
        input(
            "good",
            vec![snapshot(
                "good",
                Phase::Original,
                review("", &["Clear writing"], &["Small dataset"], &[]),
            )],
            vec![human.clone()],
        ),
        input(
            "partial",
            vec![
                snapshot("partial", Phase::Original, review("", &["Clear writing"], &[], &[])),
                snapshot(
                    "partial",
                    Phase::Updated,
                    review("", &["Clear writing TIMEOUT"], &[], &[]),
                ),
            ],
            vec![human],
        ),
    ];

    let evaluation = evaluate_corpus(&inputs, &provider, &config, &cache).expect("evaluation runs");
    let summary = &evaluation.summary;

    assert_eq!(summary.failed_papers, vec!["partial".to_string()]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, "embedding_provider_failure");
    assert_eq!(summary.failures[0].phase, Some(Phase::Updated));
    assert!(summary.failures[0].reason.contains("after 2 attempt(s)"));

    // The failed phase is excluded but the original still counts.
    assert_eq!(summary.total_papers, 2);
    assert_eq!(summary.total_snapshots, 2);
    assert_eq!(summary.rebuttal.papers_with_rebuttal, 0);

    let good = &evaluation.outcomes[0];
    assert_eq!(good.paper_id, "good");
    assert_eq!(good.scores[0].coverage, 1.0);
}

#[test]
fn empty_reference_set_is_reported_and_excluded() {
    let provider = LocalHashEmbedder::default();
    let cache = EmbeddingCache::new();
    let config = no_wait_config();

    let inputs = vec![
        input(
            "lonely",
            vec![snapshot("lonely", Phase::Original, review("", &["Clear writing"], &[], &[]))],
            vec![],
        ),
        input(
            "fine",
            vec![snapshot("fine", Phase::Original, review("", &["Clear writing"], &[], &[]))],
            vec![review("", &["Clear writing"], &[], &[])],
        ),
    ];

    let evaluation = evaluate_corpus(&inputs, &provider, &config, &cache).expect("evaluation runs");
    assert_eq!(evaluation.summary.total_papers, 1);
    assert_eq!(evaluation.summary.failed_papers, vec!["lonely".to_string()]);
    assert_eq!(evaluation.summary.failures[0].kind, "reference_set_empty");
    assert_eq!(evaluation.summary.failures[0].phase, None);
    assert_eq!(evaluation.summary.avg_coverage, 1.0);
}

#[test]
fn worker_count_does_not_change_results() {
    let provider = LocalHashEmbedder::default();
    let human = review(
        "The paper proposes a new reviewer model. Results are mixed.",
        &["Clear motivation", "Thorough experiments"],
        &["Limited datasets", "No human study"],
        &["Add an ablation on prompt length"],
    );
    let inputs = (0..12)
        .map(|index| {
            let id = format!("{index:02}");
            let weaknesses: &[&str] = if index % 2 == 0 {
                &["Limited datasets"]
            } else {
                &["Only two datasets are used", "No human study"]
            };
            input(
                &id,
                vec![
                    snapshot(
                        &id,
                        Phase::Original,
                        review("A reviewer model.", &["Clear motivation"], weaknesses, &[]),
                    ),
                    snapshot(
                        &id,
                        Phase::Updated,
                        review(
                            "A reviewer model.",
                            &["Clear motivation"],
                            &["Limited datasets"],
                            &[],
                        ),
                    ),
                ],
                vec![human.clone()],
            )
        })
        .collect::<Vec<_>>();

    let single = EvalConfig {
        workers: 1,
        ..no_wait_config()
    };
    let many = EvalConfig {
        workers: 6,
        ..no_wait_config()
    };
    let left = evaluate_corpus(&inputs, &provider, &single, &EmbeddingCache::new()).expect("runs");
    let right = evaluate_corpus(&inputs, &provider, &many, &EmbeddingCache::new()).expect("runs");

    assert_eq!(left.summary, right.summary);
    for outcome in &left.outcomes {
        let impact = outcome.impact.as_ref().expect("both phases scored");
        let expected =
            analyze_rebuttal(&outcome.scores[0], &outcome.scores[1], &single.significance);
        assert_eq!(impact.coverage_delta, outcome.scores[1].coverage - outcome.scores[0].coverage);
        assert_eq!(impact, &expected);
    }
}

#[test]
fn evaluate_command_writes_report_and_summary() {
    let root = tempfile::tempdir().expect("tempdir should be created");
    let runs_dir = root.path().join("runs");
    let output_dir = root.path().join("out");

    let record = serde_json::json!({
        "summary": "The paper studies automated reviewing.",
        "strengths": ["Clear writing", {"text": "Strong baselines", "facet": "experiments"}],
        "weaknesses": ["Small dataset"],
        "suggestions": []
    });
    let updated = serde_json::json!({
        "summary": "The paper studies automated reviewing.",
        "strengths": ["Clear writing", "Strong baselines"],
        "weaknesses": [],
        "suggestions": ["Report variance across seeds"]
    });
    let humans = serde_json::json!([
        {
            "rid": "R1",
            "summary": "Automated reviewing study.",
            "strengths": ["Clear writing"],
            "weaknesses": ["Small dataset"],
            "suggestions": []
        },
        {
            "summary": "",
            "strengths": ["Strong baselines"],
            "weaknesses": [],
            "suggestions": ["Report variance"]
        }
    ]);

    let paper_dir = runs_dir.join("paper_21_gpt_default");
    fs::create_dir_all(&paper_dir).expect("paper dir should be created");
    fs::write(paper_dir.join("review_original.json"), record.to_string()).expect("write");
    fs::write(paper_dir.join("review_updated.json"), updated.to_string()).expect("write");
    fs::write(paper_dir.join("human_reviews.json"), humans.to_string()).expect("write");

    let broken_dir = runs_dir.join("paper_22");
    fs::create_dir_all(&broken_dir).expect("paper dir should be created");
    fs::write(broken_dir.join("review_original.json"), "{\"summary\": 1}").expect("write");
    fs::write(broken_dir.join("human_reviews.json"), humans.to_string()).expect("write");

    run(EvaluateArgs {
        runs_dir,
        output_dir: output_dir.clone(),
        config: None,
        paper_ids: vec![],
        latest_only: false,
        include_all_dirs: false,
        recent_only: true,
        hours_back: 24,
        embedding_db: Some(root.path().join("embeddings.sqlite")),
        overrides: ConfigOverrides {
            workers: Some(2),
            ..ConfigOverrides::default()
        },
    })
    .expect("evaluate should complete despite the broken paper");

    let raw = fs::read_to_string(output_dir.join("evaluation_report.json")).expect("report exists");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("report is json");
    assert_eq!(report["summary"]["total_papers"], 1);
    assert_eq!(report["summary"]["total_snapshots"], 2);
    assert_eq!(report["summary"]["failed_papers"][0], "22");
    assert_eq!(report["rows"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["config"]["workers"], 2);
    assert!(report["run_id"].as_str().is_some_and(|id| id.starts_with("eval-")));
    let original = &report["papers"][0]["scores"][0];
    assert_eq!(original["per_reference"][0]["reviewer_id"], "R1");
    assert_eq!(original["per_reference"][1]["reviewer_id"], "reviewer_1");
    assert!(original["length_ratio"].as_f64().is_some_and(|ratio| ratio > 0.0));

    let markdown =
        fs::read_to_string(output_dir.join("evaluation_summary.md")).expect("summary exists");
    assert!(markdown.contains("### Paper 21"));
    assert!(markdown.contains("#### 🔄 Rebuttal Impact"));
    assert!(markdown.contains("malformed_review_record"));

    let csv = fs::read_to_string(output_dir.join("detailed_comparison.csv")).expect("csv exists");
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.lines().nth(1).is_some_and(|row| row.starts_with("21,original,")));
}
