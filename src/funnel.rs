use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::config::{FunnelConfig, RefinementKind, VerdictStrategy};
use crate::error::TriageError;
use crate::filters::{KeywordFilter, RecencyFilter, SimilarityFilter, StageFilter, TopSources};
use crate::oracle::SimilarityOracle;
use crate::record::{Collection, TextField};
use crate::sink::{self, VisualizationSink};
use crate::validate;
use crate::verdict::{KeywordVerdicts, ScoreVerdicts, VerdictClassifier};

pub const COLLECTED: &str = "Collected";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Collecting,
    Validating,
    SourceFiltering,
    SummaryCloud,
    KeywordFiltering,
    SimilaritySummaryFiltering,
    TitleSimilarityFiltering,
    FinalRefinement,
    Reporting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Side output rendered from the collection a stage retained.
#[derive(Debug, Clone)]
pub enum Chart {
    TimeSeries(String),
    WordClouds { field: TextField, name: String },
}

impl Chart {
    fn render(&self, sink: &dyn VisualizationSink, collection: &Collection) -> Result<(), TriageError> {
        match self {
            Chart::TimeSeries(name) => sink.time_series(collection, name),
            Chart::WordClouds { field, name } => {
                debug!(phase = %Phase::SummaryCloud, %field, "Rendering word frequencies");
                let groups = sink::group_texts(collection, *field)?;
                sink.word_frequencies(&groups, name)
            }
        }
    }
}

pub struct FunnelStage {
    phase: Phase,
    label: String,
    filter: Box<dyn StageFilter>,
    guarded: bool,
    charts: Vec<Chart>,
}

impl FunnelStage {
    /// A stage whose result is kept even when it is small.
    pub fn new(phase: Phase, label: impl Into<String>, filter: impl StageFilter + 'static) -> Self {
        Self {
            phase,
            label: label.into(),
            filter: Box::new(filter),
            guarded: false,
            charts: Vec::new(),
        }
    }

    /// A stage that falls back to its input when the result drops below the floor.
    pub fn guarded(phase: Phase, label: impl Into<String>, filter: impl StageFilter + 'static) -> Self {
        Self {
            guarded: true,
            ..Self::new(phase, label, filter)
        }
    }

    pub fn with_chart(mut self, chart: Chart) -> Self {
        self.charts.push(chart);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    /// Size of the collection kept after the stage.
    pub size: usize,
    /// Size the filter produced before any fallback.
    pub attempted: usize,
    pub fell_back: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunnelTrace {
    entries: Vec<TraceEntry>,
}

impl FunnelTrace {
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.size).collect()
    }

    fn push(&mut self, stage: &str, size: usize, attempted: usize, fell_back: bool) {
        self.entries.push(TraceEntry {
            stage: stage.to_string(),
            size,
            attempted,
            fell_back,
        });
    }
}

/// Result of a run: the trace plus every collection kept along the way.
#[derive(Debug, Clone)]
pub struct FunnelOutcome {
    pub trace: FunnelTrace,
    pub snapshots: Vec<Arc<Collection>>,
    retained: Arc<Collection>,
}

impl FunnelOutcome {
    pub fn final_collection(&self) -> &Collection {
        &self.retained
    }
}

/// Ordered narrowing stages with a minimum-size fallback.
pub struct Funnel {
    floor: usize,
    stages: Vec<FunnelStage>,
    funnel_chart: Option<String>,
}

impl Funnel {
    pub fn new(floor: usize) -> Self {
        Self {
            floor,
            stages: Vec::new(),
            funnel_chart: None,
        }
    }

    pub fn stage(mut self, stage: FunnelStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_funnel_chart(mut self, name: impl Into<String>) -> Self {
        self.funnel_chart = Some(name.into());
        self
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    pub fn stages(&self) -> &[FunnelStage] {
        &self.stages
    }

    /// Runs every stage over an already collected and validated set.
    ///
    /// Only an empty input is an error here; guarded stages that leave fewer
    /// rows than the floor are replaced by their input.
    pub async fn run(
        &self,
        collected: Collection,
        sink: &dyn VisualizationSink,
    ) -> Result<FunnelOutcome, TriageError> {
        if collected.is_empty() {
            return Err(TriageError::EmptyCollection);
        }

        let mut trace = FunnelTrace::default();
        let mut current = Arc::new(collected);
        trace.push(COLLECTED, current.len(), current.len(), false);
        let mut snapshots = vec![current.clone()];

        for stage in &self.stages {
            debug!(phase = %stage.phase, stage = %stage.label, rows = current.len(), "Entering stage");

            let next = stage.filter.apply(&current).await?;
            let attempted = next.len();

            let fell_back = stage.guarded && attempted < self.floor;
            if fell_back {
                warn!(
                    stage = %stage.label,
                    attempted,
                    floor = self.floor,
                    kept = current.len(),
                    "Fewer articles than the floor, loosening the constraint and keeping the previous set"
                );
            } else {
                current = Arc::new(next);
            }

            info!(stage = %stage.label, rows = current.len(), "Stage finished");
            trace.push(&stage.label, current.len(), attempted, fell_back);
            snapshots.push(current.clone());

            for chart in &stage.charts {
                chart.render(sink, &current)?;
            }
        }

        debug!(phase = %Phase::Reporting, "Rendering funnel");
        if let Some(name) = &self.funnel_chart {
            sink.funnel(&trace, name)?;
        }
        debug!(phase = %Phase::Done, sizes = ?trace.sizes(), "Funnel complete");

        Ok(FunnelOutcome {
            trace,
            snapshots,
            retained: current,
        })
    }
}

/// Reference work the similarity stages compare against.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub title: String,
    pub abstract_text: Option<String>,
}

/// The standard plan: source grouping, summary, title and final refinement.
///
/// Without an oracle the similarity stages are left out and the final
/// refinement falls back to the recency threshold.
pub fn standard(
    config: &FunnelConfig,
    reference: &Reference,
    oracle: Option<Arc<dyn SimilarityOracle>>,
) -> Funnel {
    let mut funnel = Funnel::new(config.floor)
        .stage(
            FunnelStage::new(Phase::SourceFiltering, "Filtered by source", TopSources::new(config.top_sources))
                .with_chart(Chart::TimeSeries("articles_by_source_year".to_string()))
                .with_chart(Chart::WordClouds {
                    field: TextField::Title,
                    name: "title_words".to_string(),
                })
                .with_chart(Chart::WordClouds {
                    field: TextField::Snippet,
                    name: "summary_words".to_string(),
                }),
        )
        .with_funnel_chart("article_funnel");

    if config.keyword_stage {
        funnel = funnel.stage(FunnelStage::guarded(
            Phase::KeywordFiltering,
            "Filtered by keyword",
            KeywordFilter::new(config.keywords.clone()),
        ));
    }

    let classifier: Arc<dyn VerdictClassifier> = match config.verdicts {
        VerdictStrategy::Keywords => Arc::new(KeywordVerdicts::default()),
        VerdictStrategy::Score => Arc::new(ScoreVerdicts::new(config.min_score)),
    };

    if let Some(oracle) = &oracle {
        let similarity = |label: &str, field: TextField, against: &str| {
            SimilarityFilter::new(label, field, against, oracle.clone())
                .with_classifier(classifier.clone())
                .with_concurrency(config.concurrency)
        };

        funnel = funnel
            .stage(
                FunnelStage::guarded(
                    Phase::SimilaritySummaryFiltering,
                    "Filtered by summary",
                    similarity("Filtered by summary", TextField::Snippet, &reference.title),
                )
                .with_chart(Chart::TimeSeries("articles_by_summary_year".to_string())),
            )
            .stage(
                FunnelStage::guarded(
                    Phase::TitleSimilarityFiltering,
                    "Similar to title",
                    similarity("Similar to title", TextField::Title, &reference.title)
                        .with_cleaning(config.min_text_len),
                )
                .with_chart(Chart::TimeSeries("articles_similar_to_title".to_string())),
            );
    }

    match (config.refinement, &oracle) {
        (RefinementKind::Abstract, Some(oracle)) => {
            let against = reference.abstract_text.as_deref().unwrap_or(&reference.title);
            let filter = SimilarityFilter::new("Final refinement", TextField::Snippet, against, oracle.clone())
                .with_classifier(classifier)
                .with_concurrency(config.concurrency)
                .with_cleaning(config.min_text_len);
            funnel.stage(FunnelStage::guarded(Phase::FinalRefinement, "Final refinement", filter))
        }
        (RefinementKind::Abstract, None) => {
            info!("No oracle, final refinement uses the recency threshold");
            funnel.stage(FunnelStage::guarded(
                Phase::FinalRefinement,
                "Final refinement",
                RecencyFilter::new(config.min_year),
            ))
        }
        (RefinementKind::Recency, _) => funnel.stage(FunnelStage::guarded(
            Phase::FinalRefinement,
            "Final refinement",
            RecencyFilter::new(config.min_year),
        )),
    }
}

/// Collects raw records for `query` and validates them.
pub async fn collect_validated(
    collector: &dyn Collector,
    query: &str,
    limit: usize,
) -> Result<Collection, TriageError> {
    debug!(phase = %Phase::Collecting, query, limit, "Collecting");
    let raw = collector.collect(query, limit).await?;
    if raw.is_empty() {
        return Err(TriageError::NoResults {
            query: query.to_string(),
        });
    }
    info!(rows = raw.len(), "Collected articles");

    debug!(phase = %Phase::Validating, "Validating");
    validate::validate(&raw)
}
