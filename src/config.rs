use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which narrowing closes the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefinementKind {
    /// Compare snippets against the reference abstract. Needs the oracle;
    /// without one the recency threshold is used.
    Abstract,
    /// Keep publications newer than the recency threshold.
    Recency,
}

/// How oracle answers are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStrategy {
    /// Positive indicator words (similar, relevant, related).
    Keywords,
    /// `SCORE:` line compared against `min_score`.
    Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Filtering stages that leave fewer rows than this fall back.
    pub floor: usize,
    pub top_sources: usize,
    /// Final refinement keeps years strictly greater than this.
    pub min_year: i32,
    pub keyword_stage: bool,
    pub keywords: Vec<String>,
    pub refinement: RefinementKind,
    pub verdicts: VerdictStrategy,
    pub min_score: f32,
    /// Oracle calls in flight per similarity stage.
    pub concurrency: usize,
    /// Minimum text length kept by the cleaning similarity stages.
    pub min_text_len: usize,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            floor: 10,
            top_sources: 10,
            min_year: 2015,
            keyword_stage: false,
            keywords: vec![
                "transformer".to_string(),
                "attention".to_string(),
                "aggregation".to_string(),
            ],
            refinement: RefinementKind::Abstract,
            verdicts: VerdictStrategy::Keywords,
            min_score: 0.6,
            concurrency: 1,
            min_text_len: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".to_string(),
            port: 11434,
            model: "llama3.2:latest".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub instance: String,
    pub engines: String,
    pub category: String,
    pub time_range: String,
    /// Raw results are cached here; an existing file is reused as-is.
    pub snapshot: Option<PathBuf>,
    pub delay_ms: u64,
    pub enrich_abstracts: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            instance: "https://searxng.site/".to_string(),
            engines: "arxiv,pubmed,google scholar,crossref,semantic scholar".to_string(),
            category: "science".to_string(),
            time_range: String::new(),
            snapshot: Some(PathBuf::from("articles_snapshot.json")),
            delay_ms: 2000,
            enrich_abstracts: false,
        }
    }
}
