use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::TriageError;
use crate::record::{Collection, Column, RawCollection, RawRow, Record};
use crate::venue;

const STAGE: &str = "validation";

/// Raw column names produced by the collectors.
pub mod columns {
    pub const TITLE: &str = "title";
    pub const VENUE: &str = "venue";
    pub const YEAR: &str = "year";
    pub const SNIPPET: &str = "snippet";
    pub const AUTHORS: &str = "authors";
    pub const URL: &str = "url";
    pub const DOI: &str = "doi";
}

const REQUIRED: [&str; 3] = [columns::TITLE, columns::VENUE, columns::YEAR];

/// Check the raw table's columns and turn every row into a typed [`Record`].
///
/// Column checks happen before any row is looked at. Rows with a blank title
/// are dropped; years that do not parse become 0.
pub fn validate(raw: &RawCollection) -> Result<Collection, TriageError> {
    let present = raw.columns();
    let missing: Vec<String> = REQUIRED
        .iter()
        .filter(|column| !present.contains(*column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TriageError::schema(STAGE, missing));
    }

    let mut schema = vec![
        Column::Title,
        Column::Venue,
        Column::Year,
        Column::NormalizedVenue,
    ];
    for (name, column) in [
        (columns::SNIPPET, Column::Snippet),
        (columns::AUTHORS, Column::Authors),
        (columns::URL, Column::Url),
        (columns::DOI, Column::Doi),
    ] {
        if present.contains(name) {
            schema.push(column);
        }
    }

    let records: Vec<Record> = raw.rows().iter().filter_map(to_record).collect();
    let dropped = raw.len() - records.len();
    if dropped > 0 {
        debug!(dropped, "Dropped rows without a title");
    }

    if records.is_empty() && !raw.is_empty() {
        return Err(TriageError::EmptyAfterCleaning {
            stage: STAGE.to_string(),
            column: columns::TITLE.to_string(),
        });
    }

    info!(rows = records.len(), "Validated collected records");
    Ok(Collection::new(schema, records))
}

fn to_record(row: &RawRow) -> Option<Record> {
    let title = text(row.get(columns::TITLE));
    if title.trim().is_empty() {
        return None;
    }

    let venue_cell = row.get(columns::VENUE);
    let doi = text(row.get(columns::DOI));

    Some(Record {
        title: title.trim().to_string(),
        venue: text(venue_cell),
        snippet: text(row.get(columns::SNIPPET)),
        authors: authors(row.get(columns::AUTHORS)),
        url: text(row.get(columns::URL)),
        doi: (!doi.is_empty()).then_some(doi),
        year: coerce_year(row.get(columns::YEAR)),
        normalized_venue: venue::normalize_value(venue_cell),
        grouped_venue: None,
        judgements: BTreeMap::new(),
        similarity: None,
    })
}

/// Publication year as a non-negative integer; anything unusable is 0.
pub fn coerce_year(value: Option<&Value>) -> i32 {
    let year = match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(text)) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    };

    match year {
        Some(year) if (0..=i32::MAX as i64).contains(&year) => year as i32,
        _ => 0,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn authors(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
