use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use paper_funnel::config::{FunnelConfig, OracleConfig};
use paper_funnel::filters::{KeywordFilter, RecencyFilter, TopSources};
use paper_funnel::funnel::{self, Funnel, FunnelStage, Phase, Reference};
use paper_funnel::oracle::{RetryingOracle, SimilarityOracle};
use paper_funnel::report::FunnelReport;
use paper_funnel::sink::ChartDataSink;
use paper_funnel::validate::validate;
use paper_funnel::venue::VenueCategory;
use paper_funnel::{OracleError, RawCollection, TriageError};

/// Says "similar" whenever the candidate mentions transformers.
struct TransformerOracle;

#[async_trait]
impl SimilarityOracle for TransformerOracle {
    async fn compare(&self, _reference: &str, candidate: &str) -> Result<String, OracleError> {
        if candidate.to_lowercase().contains("transformer") {
            Ok("SCORE: 0.9\nVERDICT: similar".to_string())
        } else {
            Ok("SCORE: 0.1\nVERDICT: distinct".to_string())
        }
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, OracleError> {
        Ok(vec![1.0, 0.0])
    }
}

struct DownOracle {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SimilarityOracle for DownOracle {
    async fn compare(&self, _reference: &str, _candidate: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(OracleError::Transient("connection refused".to_string()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, OracleError> {
        Err(OracleError::Transient("connection refused".to_string()))
    }
}

fn raw(rows: Vec<Value>) -> RawCollection {
    RawCollection::new(
        rows.into_iter()
            .map(|row| row.as_object().cloned().unwrap())
            .collect(),
    )
}

/// 12 records over three venues; the last 8 are recent transformer papers.
fn three_venues() -> RawCollection {
    raw((0..12)
        .map(|i| {
            let venue = match i {
                0 => "IEEE X",
                1 => "Arxiv Y",
                _ => "Unknown Z",
            };
            let (title, year) = if i < 4 {
                (format!("Convolution study {i}"), "2010")
            } else {
                (format!("A Transformer study {i}"), "2018")
            };
            json!({"title": title, "venue": venue, "year": year, "snippet": "text"})
        })
        .collect())
}

fn standard_input() -> RawCollection {
    raw((0..15)
        .map(|i| {
            json!({
                "title": if i < 6 { format!("Transformer variant {i}") } else { format!("Paper {i}") },
                "venue": (["IEEE Access", "arXiv", "Neural Computing"][i % 3]),
                "year": if i == 0 { json!(2012) } else { json!("2020") },
                "snippet": if i < 12 { "We study transformer attention heads." } else { "Soil analysis." },
                "authors": ["A. Author", "B. Author"],
                "url": format!("https://example.org/{i}"),
            })
        })
        .collect())
}

#[tokio::test]
async fn source_tags_and_recency_produce_the_expected_trace() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ChartDataSink::new(dir.path()).unwrap();
    let collected = validate(&three_venues()).unwrap();

    let funnel = Funnel::new(5)
        .stage(FunnelStage::new(Phase::SourceFiltering, "Filtered by source", TopSources::new(2)))
        .stage(FunnelStage::guarded(Phase::FinalRefinement, "Final refinement", RecencyFilter::new(2015)));
    let outcome = funnel.run(collected, &sink).await.unwrap();

    assert_eq!(outcome.trace.sizes(), vec![12, 12, 8]);

    let grouped: Vec<VenueCategory> = outcome.snapshots[1]
        .records()
        .iter()
        .filter_map(|r| r.grouped_venue)
        .collect();
    assert_eq!(grouped[0], VenueCategory::Ieee);
    assert_eq!(grouped[1], VenueCategory::Arxiv);
    assert_eq!(grouped.iter().filter(|v| **v == VenueCategory::Other).count(), 10);
    assert!(outcome.final_collection().records().iter().all(|r| r.year > 2015));
}

#[tokio::test]
async fn keyword_stage_narrows_and_the_default_floor_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ChartDataSink::new(dir.path()).unwrap();

    let funnel = Funnel::new(10)
        .stage(FunnelStage::new(Phase::SourceFiltering, "Filtered by source", TopSources::new(2)))
        .stage(FunnelStage::guarded(
            Phase::KeywordFiltering,
            "Filtered by keyword",
            KeywordFilter::new(["transformer"]),
        ));
    let outcome = funnel.run(validate(&three_venues()).unwrap(), &sink).await.unwrap();

    let last = outcome.trace.entries().last().unwrap();
    assert_eq!(last.attempted, 8);
    assert!(last.fell_back);
    assert_eq!(outcome.trace.sizes(), vec![12, 12, 12]);
    assert_eq!(outcome.final_collection(), outcome.snapshots[1].as_ref());
}

#[tokio::test]
async fn standard_plan_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ChartDataSink::new(dir.path()).unwrap();
    let reference = Reference {
        title: "Aggregation functions in transformer self-attention".to_string(),
        abstract_text: None,
    };

    let plan = funnel::standard(
        &FunnelConfig::default(),
        &reference,
        Some(Arc::new(TransformerOracle)),
    );
    let outcome = plan.run(validate(&standard_input()).unwrap(), &sink).await.unwrap();

    // the final refinement compares snippets, so the 2012 row stays
    assert_eq!(outcome.trace.sizes(), vec![15, 15, 12, 12, 12]);
    let fell_back: Vec<bool> = outcome.trace.entries().iter().map(|e| e.fell_back).collect();
    assert_eq!(fell_back, vec![false, false, false, true, false]);

    for file in [
        "articles_by_source_year.json",
        "articles_by_summary_year.json",
        "articles_similar_to_title.json",
        "article_funnel.json",
    ] {
        assert!(dir.path().join(file).exists(), "missing {file}");
    }
    assert!(dir.path().join("title_words").join("title_words_general.json").exists());
    assert!(dir.path().join("summary_words").join("summary_words_IEEE.json").exists());

    let report = FunnelReport::new(
        "transformer",
        &reference,
        plan.floor(),
        &outcome.trace,
        outcome.final_collection().records().to_vec(),
        false,
    );
    report.write(dir.path()).unwrap();
    let loaded = FunnelReport::load(dir.path()).unwrap();
    assert_eq!(loaded.records.len(), 12);
    assert!(loaded.records.iter().all(|r| r.judgements.contains_key("Final refinement")));
    assert_eq!(loaded.trace.len(), 5);
}

#[tokio::test]
async fn exhausted_oracle_retries_abort_the_funnel() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ChartDataSink::new(dir.path()).unwrap();
    let reference = Reference {
        title: "Transformers".to_string(),
        abstract_text: None,
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let down = Arc::new(RetryingOracle::new(
        DownOracle {
            calls: calls.clone(),
        },
        &OracleConfig {
            attempts: 3,
            backoff_ms: 0,
            timeout_secs: 5,
            ..OracleConfig::default()
        },
    ));
    let plan = funnel::standard(&FunnelConfig::default(), &reference, Some(down));

    let err = plan
        .run(validate(&standard_input()).unwrap(), &sink)
        .await
        .unwrap_err();
    match err {
        TriageError::Oracle { stage, source } => {
            assert_eq!(stage, "Filtered by summary");
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    // the first row exhausts its attempts and nothing after it is asked
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_year_column_aborts_before_filtering() {
    let table = raw(vec![json!({"title": "Transformers", "venue": "IEEE"})]);
    let err = validate(&table).unwrap_err();
    assert_eq!(err.to_string(), "validation: missing required column(s): year");
}
