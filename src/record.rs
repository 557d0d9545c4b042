use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TriageError;
use crate::venue::VenueCategory;

/// One raw row as handed over by a collector, keyed by column name.
pub type RawRow = Map<String, Value>;

/// Raw rows before validation. Columns are whatever keys the rows carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCollection {
    rows: Vec<RawRow>,
}

impl RawCollection {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A column is present when at least one row carries the key.
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect()
    }
}

/// Columns a [`Collection`] can carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Title,
    Venue,
    Year,
    Snippet,
    Authors,
    Url,
    Doi,
    NormalizedVenue,
    GroupedVenue,
    Verdict(String),
    Similarity,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Title => f.write_str("title"),
            Column::Venue => f.write_str("venue"),
            Column::Year => f.write_str("year"),
            Column::Snippet => f.write_str("snippet"),
            Column::Authors => f.write_str("authors"),
            Column::Url => f.write_str("url"),
            Column::Doi => f.write_str("doi"),
            Column::NormalizedVenue => f.write_str("normalized_venue"),
            Column::GroupedVenue => f.write_str("grouped_venue"),
            Column::Verdict(stage) => write!(f, "verdict:{stage}"),
            Column::Similarity => f.write_str("similarity"),
        }
    }
}

/// Free-text field of a record compared by the similarity stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextField {
    Title,
    Snippet,
}

impl TextField {
    pub fn column(&self) -> Column {
        match self {
            TextField::Title => Column::Title,
            TextField::Snippet => Column::Snippet,
        }
    }

    pub fn text<'a>(&self, record: &'a Record) -> &'a str {
        match self {
            TextField::Title => &record.title,
            TextField::Snippet => &record.snippet,
        }
    }
}

impl fmt::Display for TextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.column().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Relevant,
    NotRelevant,
    Unknown,
}

/// Oracle answer for one record in one similarity stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub response: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScores {
    pub title: f32,
    pub abstract_text: f32,
    pub mean: f32,
}

/// A candidate publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub venue: String,
    pub snippet: String,
    pub authors: Vec<String>,
    pub url: String,
    pub doi: Option<String>,
    /// Publication year, 0 when unknown.
    pub year: i32,
    pub normalized_venue: VenueCategory,
    pub grouped_venue: Option<VenueCategory>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub judgements: BTreeMap<String, Judgement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityScores>,
}

/// The working table at one point of the funnel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    schema: BTreeSet<Column>,
    records: Vec<Record>,
}

impl Collection {
    pub fn new(schema: impl IntoIterator<Item = Column>, records: Vec<Record>) -> Self {
        Self {
            schema: schema.into_iter().collect(),
            records,
        }
    }

    pub fn schema(&self) -> &BTreeSet<Column> {
        &self.schema
    }

    pub fn has_column(&self, column: &Column) -> bool {
        self.schema.contains(column)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fails with a schema error listing every column in `columns` that is absent.
    pub fn require(&self, stage: &str, columns: &[Column]) -> Result<(), TriageError> {
        let missing: Vec<String> = columns
            .iter()
            .filter(|column| !self.schema.contains(*column))
            .map(ToString::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TriageError::schema(stage, missing))
        }
    }

    /// Copy of the rows matching `keep`, same schema.
    pub fn filtered(&self, keep: impl Fn(&Record) -> bool) -> Collection {
        Collection {
            schema: self.schema.clone(),
            records: self.records.iter().filter(|record| keep(*record)).cloned().collect(),
        }
    }

    /// Same schema plus `column`, with `records` replacing the rows.
    pub fn derive(&self, column: Column, records: Vec<Record>) -> Collection {
        let mut schema = self.schema.clone();
        schema.insert(column);
        Collection { schema, records }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::venue;

    pub fn record(title: &str, venue: &str, year: i32) -> Record {
        Record {
            title: title.to_string(),
            venue: venue.to_string(),
            snippet: format!("Abstract of {title}"),
            authors: vec!["A. Author".to_string()],
            url: format!("https://example.org/{}", title.replace(' ', "-")),
            doi: None,
            year,
            normalized_venue: venue::normalize(venue),
            grouped_venue: None,
            judgements: BTreeMap::new(),
            similarity: None,
        }
    }

    pub fn collection(records: Vec<Record>) -> Collection {
        Collection::new(
            [
                Column::Title,
                Column::Venue,
                Column::Year,
                Column::Snippet,
                Column::Authors,
                Column::Url,
                Column::NormalizedVenue,
            ],
            records,
        )
    }
}
