use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::TriageError;
use crate::oracle::SimilarityOracle;
use crate::record::{Collection, Column, Judgement, Record, TextField, Verdict};
use crate::venue::VenueCategory;
use crate::verdict::{KeywordVerdicts, VerdictClassifier};

/// One narrowing step. Implementations never modify their input.
#[async_trait]
pub trait StageFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, collection: &Collection) -> Result<Collection, TriageError>;
}

/// Labels the N most frequent venues and folds the rest into `Other`.
///
/// `Other` never competes for a slot. Ties keep the order in which the venues
/// first appear in the collection.
#[derive(Debug, Clone)]
pub struct TopSources {
    n: usize,
}

impl TopSources {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

/// The `n` most frequent known venues, most frequent first.
pub fn top_venues(records: &[Record], n: usize) -> Vec<VenueCategory> {
    let mut counts: Vec<(VenueCategory, usize)> = Vec::new();
    for record in records {
        if record.normalized_venue == VenueCategory::Other {
            continue;
        }
        match counts.iter_mut().find(|(venue, _)| *venue == record.normalized_venue) {
            Some((_, count)) => *count += 1,
            None => counts.push((record.normalized_venue, 1)),
        }
    }

    // stable: equal counts stay in first-seen order
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(n).map(|(venue, _)| venue).collect()
}

#[async_trait]
impl StageFilter for TopSources {
    fn name(&self) -> &str {
        "top sources"
    }

    async fn apply(&self, collection: &Collection) -> Result<Collection, TriageError> {
        collection.require(self.name(), &[Column::NormalizedVenue])?;

        let top = top_venues(collection.records(), self.n);
        debug!(?top, "Top venues");

        let records = collection
            .records()
            .iter()
            .cloned()
            .map(|mut record| {
                record.grouped_venue = Some(if top.contains(&record.normalized_venue) {
                    record.normalized_venue
                } else {
                    VenueCategory::Other
                });
                record
            })
            .collect();

        Ok(collection.derive(Column::GroupedVenue, records))
    }
}

/// Keeps rows whose title contains any keyword, ignoring case.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new(keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl StageFilter for KeywordFilter {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn apply(&self, collection: &Collection) -> Result<Collection, TriageError> {
        collection.require(self.name(), &[Column::Title])?;

        Ok(collection.filtered(|record| {
            let title = record.title.to_lowercase();
            self.keywords.iter().any(|k| title.contains(k.as_str()))
        }))
    }
}

/// Keeps rows published strictly after `after`.
#[derive(Debug, Clone)]
pub struct RecencyFilter {
    after: i32,
}

impl RecencyFilter {
    pub fn new(after: i32) -> Self {
        Self { after }
    }
}

#[async_trait]
impl StageFilter for RecencyFilter {
    fn name(&self) -> &str {
        "recency"
    }

    async fn apply(&self, collection: &Collection) -> Result<Collection, TriageError> {
        collection.require(self.name(), &[Column::Year])?;
        Ok(collection.filtered(|record| record.year > self.after))
    }
}

/// Asks the oracle about every row and keeps the ones judged relevant.
///
/// Oracle failures are returned as stage failures; nothing is skipped.
pub struct SimilarityFilter {
    label: String,
    field: TextField,
    reference: String,
    oracle: Arc<dyn SimilarityOracle>,
    classifier: Arc<dyn VerdictClassifier>,
    min_text_len: Option<usize>,
    concurrency: usize,
}

impl SimilarityFilter {
    pub fn new(
        label: impl Into<String>,
        field: TextField,
        reference: impl Into<String>,
        oracle: Arc<dyn SimilarityOracle>,
    ) -> Self {
        Self {
            label: label.into(),
            field,
            reference: reference.into(),
            oracle,
            classifier: Arc::new(KeywordVerdicts::default()),
            min_text_len: None,
            concurrency: 1,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn VerdictClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Drop rows whose compared text has at most `min_len` characters first.
    pub fn with_cleaning(mut self, min_len: usize) -> Self {
        self.min_text_len = Some(min_len);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn clean(&self, collection: &Collection) -> Result<Vec<Record>, TriageError> {
        let Some(min_len) = self.min_text_len else {
            return Ok(collection.records().to_vec());
        };

        let kept: Vec<Record> = collection
            .records()
            .iter()
            .filter(|record| self.field.text(record).trim().chars().count() > min_len)
            .cloned()
            .collect();

        if kept.is_empty() {
            return Err(TriageError::EmptyAfterCleaning {
                stage: self.label.clone(),
                column: self.field.to_string(),
            });
        }
        Ok(kept)
    }
}

#[async_trait]
impl StageFilter for SimilarityFilter {
    fn name(&self) -> &str {
        &self.label
    }

    async fn apply(&self, collection: &Collection) -> Result<Collection, TriageError> {
        collection.require(&self.label, &[self.field.column()])?;
        let rows = self.clean(collection)?;

        let calls: Vec<_> = rows
            .iter()
            .map(|record| self.oracle.compare(&self.reference, self.field.text(record)))
            .collect();

        // `buffered` yields in input order, so the result does not depend on
        // which call finishes first.
        let responses: Vec<String> = stream::iter(calls)
            .buffered(self.concurrency)
            .try_collect()
            .await
            .map_err(|source| TriageError::Oracle {
                stage: self.label.clone(),
                source,
            })?;

        let mut kept = Vec::with_capacity(rows.len());
        for (mut record, response) in rows.into_iter().zip(responses) {
            let verdict = self.classifier.classify(&response);
            record
                .judgements
                .insert(self.label.clone(), Judgement { response, verdict });
            if verdict == Verdict::Relevant {
                kept.push(record);
            }
        }

        debug!(stage = %self.label, kept = kept.len(), "Similarity stage finished");
        Ok(collection.derive(Column::Verdict(self.label.clone()), kept))
    }
}
