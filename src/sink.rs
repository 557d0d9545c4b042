use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::TriageError;
use crate::funnel::FunnelTrace;
use crate::record::{Collection, Column, TextField};

/// Consumer of finished tables. Nothing it returns feeds back into the funnel.
pub trait VisualizationSink: Send + Sync {
    /// Publications per year and grouped venue.
    fn time_series(&self, collection: &Collection, name: &str) -> Result<(), TriageError>;

    fn funnel(&self, trace: &FunnelTrace, name: &str) -> Result<(), TriageError>;

    /// `groups` holds (group name, concatenated text) pairs.
    fn word_frequencies(&self, groups: &[(String, String)], name: &str) -> Result<(), TriageError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub counts: Vec<usize>,
}

/// Year × grouped venue pivot, series ordered by total count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub years: Vec<i32>,
    pub series: Vec<Series>,
}

pub fn time_series(collection: &Collection) -> Result<TimeSeries, TriageError> {
    collection.require("time series", &[Column::GroupedVenue, Column::Year])?;

    let mut pivot: BTreeMap<String, BTreeMap<i32, usize>> = BTreeMap::new();
    for record in collection.records() {
        let group = record.grouped_venue.unwrap_or(record.normalized_venue);
        *pivot
            .entry(group.label().to_string())
            .or_default()
            .entry(record.year)
            .or_default() += 1;
    }

    let mut years: Vec<i32> = collection.records().iter().map(|r| r.year).collect();
    years.sort_unstable();
    years.dedup();

    let mut series: Vec<Series> = pivot
        .into_iter()
        .map(|(name, by_year)| Series {
            counts: years
                .iter()
                .map(|year| by_year.get(year).copied().unwrap_or(0))
                .collect(),
            name,
        })
        .collect();
    series.sort_by(|a, b| {
        let total = |s: &Series| s.counts.iter().sum::<usize>();
        total(b).cmp(&total(a))
    });

    Ok(TimeSeries { years, series })
}

/// Concatenated `field` text per grouped venue, followed by a "general" group.
pub fn group_texts(collection: &Collection, field: TextField) -> Result<Vec<(String, String)>, TriageError> {
    collection.require("word frequencies", &[Column::GroupedVenue, field.column()])?;

    let mut order: Vec<String> = Vec::new();
    let mut texts: HashMap<String, Vec<&str>> = HashMap::new();
    for record in collection.records() {
        let group = record
            .grouped_venue
            .unwrap_or(record.normalized_venue)
            .label()
            .to_string();
        if !texts.contains_key(&group) {
            order.push(group.clone());
        }
        texts.entry(group).or_default().push(field.text(record));
    }

    let mut groups: Vec<(String, String)> = order
        .into_iter()
        .map(|group| {
            let joined = texts.get(&group).map(|t| t.join(" ")).unwrap_or_default();
            (group, joined)
        })
        .collect();

    let general = collection
        .records()
        .iter()
        .map(|r| field.text(r))
        .collect::<Vec<_>>()
        .join(" ");
    groups.push(("general".to_string(), general));
    Ok(groups)
}

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "between", "both", "but", "by", "can", "could", "do", "does", "each", "for", "from", "has",
    "have", "how", "in", "into", "is", "it", "its", "more", "most", "no", "not", "of", "on",
    "or", "other", "our", "over", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "under", "using", "via", "was",
    "we", "were", "what", "when", "which", "while", "with", "within", "without", "you",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

/// Most frequent words of `text`, stop-words and very short tokens removed.
pub fn word_frequencies(text: &str, top: usize) -> Vec<WordCount> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() > 2 && !stopwords.contains(t.as_str()))
    {
        *counts.entry(token).or_default() += 1;
    }

    let mut words: Vec<WordCount> = counts
        .into_iter()
        .map(|(word, count)| WordCount { word, count })
        .collect();
    words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    words.truncate(top);
    words
}

/// Writes chart-ready JSON documents into a directory.
pub struct ChartDataSink {
    out_dir: PathBuf,
    top_words: usize,
    unsafe_chars: Regex,
}

impl ChartDataSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, TriageError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            top_words: 100,
            unsafe_chars: Regex::new(r"[^\w\s]").expect("sanitizer pattern is valid"),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// File-name safe form of a group name ("Neural Networks" -> "Neural_Networks").
    pub fn sanitize(&self, name: &str) -> String {
        self.unsafe_chars.replace_all(name, "").replace(' ', "_")
    }

    fn write_json<T: Serialize>(&self, file: &Path, value: &T) -> Result<(), TriageError> {
        let failed = |reason: String| TriageError::Sink {
            name: file.display().to_string(),
            reason,
        };

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        let body = serde_json::to_string_pretty(value).map_err(|e| failed(e.to_string()))?;
        fs::write(file, body).map_err(|e| failed(e.to_string()))?;
        debug!(file = %file.display(), "Chart data written");
        Ok(())
    }
}

#[derive(Serialize)]
struct FunnelChart<'a> {
    stages: Vec<&'a str>,
    counts: Vec<usize>,
}

#[derive(Serialize)]
struct WordCloud<'a> {
    group: &'a str,
    words: Vec<WordCount>,
}

impl VisualizationSink for ChartDataSink {
    fn time_series(&self, collection: &Collection, name: &str) -> Result<(), TriageError> {
        let table = time_series(collection)?;
        self.write_json(&self.out_dir.join(format!("{}.json", self.sanitize(name))), &table)
    }

    fn funnel(&self, trace: &FunnelTrace, name: &str) -> Result<(), TriageError> {
        let chart = FunnelChart {
            stages: trace.entries().iter().map(|e| e.stage.as_str()).collect(),
            counts: trace.sizes(),
        };
        self.write_json(&self.out_dir.join(format!("{}.json", self.sanitize(name))), &chart)
    }

    fn word_frequencies(&self, groups: &[(String, String)], name: &str) -> Result<(), TriageError> {
        let dir = self.out_dir.join(self.sanitize(name));
        for (group, text) in groups {
            let cloud = WordCloud {
                group,
                words: word_frequencies(text, self.top_words),
            };
            let file = dir.join(format!("{}_{}.json", self.sanitize(name), self.sanitize(group)));
            self.write_json(&file, &cloud)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{collection, record};
    use crate::venue::VenueCategory;

    fn grouped(rows: &[(&str, i32, VenueCategory)]) -> Collection {
        let records = rows
            .iter()
            .map(|(title, year, group)| {
                let mut r = record(title, group.label(), *year);
                r.grouped_venue = Some(*group);
                r
            })
            .collect();
        let base = collection(vec![]);
        base.derive(Column::GroupedVenue, records)
    }

    #[test]
    fn time_series_orders_series_by_total() {
        let coll = grouped(&[
            ("a", 2019, VenueCategory::Ieee),
            ("b", 2020, VenueCategory::Arxiv),
            ("c", 2020, VenueCategory::Arxiv),
            ("d", 2021, VenueCategory::Arxiv),
            ("e", 2021, VenueCategory::Ieee),
            ("f", 2021, VenueCategory::Other),
            ("g", 2021, VenueCategory::Other),
            ("h", 2019, VenueCategory::Other),
            ("i", 2020, VenueCategory::Other),
        ]);
        let table = time_series(&coll).unwrap();

        assert_eq!(table.years, vec![2019, 2020, 2021]);
        let names: Vec<&str> = table.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Other", "Arxiv", "IEEE"]);
        assert_eq!(table.series[1].counts, vec![0, 2, 1]);
    }

    #[test]
    fn time_series_needs_grouped_venues() {
        let coll = collection(vec![record("a", "IEEE", 2020)]);
        assert!(matches!(time_series(&coll), Err(TriageError::Schema { .. })));
    }

    #[test]
    fn group_texts_adds_general_group_last() {
        let coll = grouped(&[
            ("attention maps", 2020, VenueCategory::Ieee),
            ("graph attention", 2020, VenueCategory::Other),
            ("sparse attention", 2021, VenueCategory::Ieee),
        ]);
        let groups = group_texts(&coll, TextField::Title).unwrap();
        assert_eq!(
            groups,
            vec![
                ("IEEE".to_string(), "attention maps sparse attention".to_string()),
                ("Other".to_string(), "graph attention".to_string()),
                ("general".to_string(), "attention maps graph attention sparse attention".to_string()),
            ]
        );
    }

    #[test]
    fn word_frequencies_skip_stopwords() {
        let words = word_frequencies("The attention of the Transformer; attention is all-you-need.", 3);
        assert_eq!(words[0], WordCount { word: "attention".into(), count: 2 });
        assert!(words.iter().all(|w| w.word != "the"));
        assert!(words.len() <= 3);
    }

    #[test]
    fn sink_writes_sanitized_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ChartDataSink::new(dir.path()).unwrap();
        assert_eq!(sink.sanitize("Neural Networks (2)"), "Neural_Networks_2");

        let groups = vec![("Remote Sensing".to_string(), "satellite imagery attention".to_string())];
        sink.word_frequencies(&groups, "title words").unwrap();
        assert!(dir
            .path()
            .join("title_words")
            .join("title_words_Remote_Sensing.json")
            .exists());
    }

    #[test]
    fn write_failures_name_the_chart_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ChartDataSink::new(dir.path()).unwrap();
        // a plain file where the word-cloud directory should go
        fs::write(dir.path().join("title_words"), "").unwrap();

        let groups = vec![("IEEE".to_string(), "attention".to_string())];
        match sink.word_frequencies(&groups, "title_words").unwrap_err() {
            TriageError::Sink { name, .. } => assert!(name.ends_with("title_words_IEEE.json")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
