use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::TriageError;
use crate::record::{RawCollection, RawRow};
use crate::validate::columns;

/// Source of raw candidate records.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, query: &str, limit: usize) -> Result<RawCollection, TriageError>;
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_5_1) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Fedora; Linux x86_64) AppleWebKit/537.36",
];

/// Collects from a SearXNG instance, caching raw results in a snapshot file.
///
/// An existing snapshot is loaded whatever the query is.
pub struct SearxngCollector {
    client: Client,
    config: CollectorConfig,
    doi_regex: Regex,
    year_regex: Regex,
}

impl SearxngCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, TriageError> {
        let user_agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            doi_regex: Regex::new(r"10\.\d{4,9}/[-._;()/:A-Za-z0-9]+").expect("DOI pattern is valid"),
            year_regex: Regex::new(r"^\s*(\d{4})").expect("year pattern is valid"),
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Value>, TriageError> {
        let url = format!("{}/search", self.config.instance.trim_end_matches('/'));
        let mut results = Vec::new();
        let mut page = 1u32;

        while results.len() < limit {
            let page_param = page.to_string();
            let mut params = vec![
                ("q", query),
                ("format", "json"),
                ("categories", self.config.category.as_str()),
                ("engines", self.config.engines.as_str()),
                ("pageno", page_param.as_str()),
            ];
            if !self.config.time_range.is_empty() {
                params.push(("time_range", self.config.time_range.as_str()));
            }

            debug!(%url, page, "Requesting SearXNG page");
            let response = self
                .client
                .get(&url)
                .query(&params)
                .header("Accept", "application/json")
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error body".to_string());
                return Err(TriageError::Upstream { status, body });
            }

            let body: Value = response.json().await?;
            let page_results = body
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if page_results.is_empty() {
                break;
            }

            results.extend(page_results);
            info!(collected = results.len(), "Articles collected");
            page += 1;
            sleep(Duration::from_millis(self.config.delay_ms)).await;
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Replaces short `content` with the page's abstract where one can be found.
    async fn enrich(&self, results: &mut [Value]) {
        for result in results.iter_mut() {
            let content_len = result.get("content").and_then(Value::as_str).map_or(0, str::len);
            if content_len >= 100 {
                continue;
            }
            let Some(url) = result.get("url").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };

            match self.fetch_page_abstract(&url).await {
                Ok(Some(text)) if text.len() > content_len => {
                    if let Some(object) = result.as_object_mut() {
                        object.insert("content".to_string(), Value::String(text));
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(%url, error = %e, "Could not fetch page abstract"),
            }
            sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
    }

    async fn fetch_page_abstract(&self, url: &str) -> Result<Option<String>, TriageError> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let html = response.text().await?;
        Ok(abstract_from_html(&html))
    }

    /// Flattens SearXNG or Google Scholar style results into raw rows.
    pub fn flatten(&self, results: &[Value]) -> RawCollection {
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(results.len());

        for result in results {
            let Some(row) = self.flatten_one(result) else {
                continue;
            };
            let key = row
                .get(columns::DOI)
                .or_else(|| row.get(columns::URL))
                .and_then(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(str::to_lowercase);
            if let Some(key) = key {
                if !seen.insert(key) {
                    debug!("Skipping duplicate result");
                    continue;
                }
            }
            rows.push(row);
        }

        RawCollection::new(rows)
    }

    fn flatten_one(&self, result: &Value) -> Option<RawRow> {
        let object = result.as_object()?;
        let mut row = Map::new();

        // Google Scholar exports nest bibliographic fields under "bib"
        if let Some(bib) = object.get("bib").and_then(Value::as_object) {
            copy(&mut row, columns::TITLE, bib.get("title"));
            copy(&mut row, columns::SNIPPET, bib.get("abstract"));
            copy(&mut row, columns::AUTHORS, bib.get("author"));
            copy(&mut row, columns::VENUE, bib.get("venue"));
            copy(&mut row, columns::YEAR, bib.get("pub_year"));
            copy(&mut row, columns::URL, object.get("pub_url"));
        } else {
            copy(&mut row, columns::TITLE, object.get("title"));
            copy(&mut row, columns::SNIPPET, object.get("content"));
            copy(&mut row, columns::AUTHORS, object.get("authors"));
            copy(&mut row, columns::URL, object.get("url"));
            let venue = ["journal", "publisher", "engine"]
                .iter()
                .filter_map(|key| object.get(*key))
                .find(|v| v.as_str().is_some_and(|s| !s.trim().is_empty()));
            row.insert(columns::VENUE.to_string(), venue.cloned().unwrap_or(Value::Null));
            row.insert(
                columns::YEAR.to_string(),
                self.year(object.get("publishedDate")),
            );
        }

        let doi = object
            .get("doi")
            .and_then(Value::as_str)
            .and_then(|doi| self.extract_doi(doi))
            .or_else(|| {
                row.get(columns::URL)
                    .and_then(Value::as_str)
                    .and_then(|url| self.extract_doi_from_url(url))
            });
        if let Some(doi) = doi {
            row.insert(columns::DOI.to_string(), Value::String(doi));
        }

        Some(row)
    }

    /// Leading four-digit year of a date, or the raw value for later coercion.
    fn year(&self, date: Option<&Value>) -> Value {
        match date {
            Some(Value::String(text)) => self
                .year_regex
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| Value::String(m.as_str().to_string()))
                .unwrap_or_else(|| Value::String(text.clone())),
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }

    pub fn extract_doi(&self, text: &str) -> Option<String> {
        self.doi_regex
            .find(text)
            .map(|m| m.as_str().trim_end_matches(['.', ';', ',']).to_string())
    }

    pub fn extract_doi_from_url(&self, url: &str) -> Option<String> {
        if url.contains("arxiv.org") {
            if let Some(id) = url.split("/abs/").nth(1).or_else(|| url.split("/pdf/").nth(1)) {
                let id = id.split('?').next().unwrap_or(id).trim_end_matches(".pdf");
                return Some(format!("arXiv:{id}"));
            }
        }
        self.extract_doi(url)
    }
}

fn copy(row: &mut RawRow, column: &str, value: Option<&Value>) {
    row.insert(column.to_string(), value.cloned().unwrap_or(Value::Null));
}

/// Abstract from citation meta tags or an abstract section.
pub fn abstract_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let meta_selectors = [
        "meta[name='citation_abstract']",
        "meta[name='description']",
        "meta[property='og:description']",
        "meta[name='DC.Description']",
    ];
    for selector in meta_selectors {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|element| element.value().attr("content"))
        {
            if content.len() > 50 {
                return Some(content.trim().to_string());
            }
        }
    }

    let section_selectors = [
        "abstract",
        ".abstract",
        "#abstract",
        "section.abstract",
        "div[class*='abstract']",
        "p[class*='abstract']",
    ];
    for selector in section_selectors {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.len() > 50 {
                return Some(text);
            }
        }
    }

    None
}

/// Raw results previously persisted as a JSON array.
pub fn load_snapshot(path: &Path) -> Result<Vec<Value>, TriageError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn save_snapshot(path: &Path, results: &[Value]) -> Result<(), TriageError> {
    fs::write(path, serde_json::to_string_pretty(results)?)?;
    Ok(())
}

#[async_trait]
impl Collector for SearxngCollector {
    async fn collect(&self, query: &str, limit: usize) -> Result<RawCollection, TriageError> {
        let results = match &self.config.snapshot {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Snapshot exists, loading results from file (query not re-run)");
                load_snapshot(path)?
            }
            snapshot => {
                info!(query, limit, "No snapshot found, starting a new search");
                let mut results = self.search(query, limit).await?;
                if self.config.enrich_abstracts {
                    self.enrich(&mut results).await;
                }
                match snapshot {
                    Some(path) if !results.is_empty() => {
                        save_snapshot(path, &results)?;
                        info!(saved = results.len(), path = %path.display(), "Snapshot saved");
                    }
                    _ => {}
                }
                results
            }
        };

        if results.is_empty() {
            warn!(query, "Upstream source returned nothing");
            return Err(TriageError::NoResults {
                query: query.to_string(),
            });
        }

        Ok(self.flatten(&results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector(snapshot: Option<&Path>) -> SearxngCollector {
        SearxngCollector::new(CollectorConfig {
            snapshot: snapshot.map(Path::to_path_buf),
            // unroutable, any accidental request fails fast
            instance: "http://127.0.0.1:9".to_string(),
            delay_ms: 0,
            ..CollectorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn flattens_searxng_paper_results() {
        let c = collector(None);
        let raw = c.flatten(&[json!({
            "title": "Attention Is All You Need",
            "url": "https://arxiv.org/abs/1706.03762v7",
            "content": "The dominant sequence transduction models...",
            "engine": "arxiv",
            "authors": ["Ashish Vaswani", "Noam Shazeer"],
            "publishedDate": "2017-06-12T17:57:34",
            "journal": null
        })]);

        let row = &raw.rows()[0];
        assert_eq!(row["title"], json!("Attention Is All You Need"));
        assert_eq!(row["venue"], json!("arxiv"));
        assert_eq!(row["year"], json!("2017"));
        assert_eq!(row["doi"], json!("arXiv:1706.03762v7"));
    }

    #[test]
    fn flattens_scholar_exports() {
        let c = collector(None);
        let raw = c.flatten(&[json!({
            "bib": {
                "title": "Choquet integral attention",
                "abstract": "We replace the dot product...",
                "author": ["A. Author"],
                "pub_year": "2022",
                "venue": "IEEE Transactions on Fuzzy Systems"
            },
            "pub_url": "https://doi.org/10.1109/TFUZZ.2022.1234567"
        })]);

        let row = &raw.rows()[0];
        assert_eq!(row["snippet"], json!("We replace the dot product..."));
        assert_eq!(row["venue"], json!("IEEE Transactions on Fuzzy Systems"));
        assert_eq!(row["doi"], json!("10.1109/TFUZZ.2022.1234567"));
    }

    #[test]
    fn duplicate_dois_are_collapsed() {
        let c = collector(None);
        let raw = c.flatten(&[
            json!({"title": "A", "url": "https://x.org/a", "doi": "10.1000/ABC"}),
            json!({"title": "A again", "url": "https://y.org/a", "doi": "https://doi.org/10.1000/abc"}),
            json!({"title": "B", "url": "https://x.org/b"}),
        ]);
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn abstracts_come_from_meta_tags_first() {
        let html = r#"<html><head>
            <meta name="citation_abstract" content="We study aggregation functions as a replacement for the attention product.">
            </head><body><div class="abstract">short</div></body></html>"#;
        assert!(abstract_from_html(html).unwrap().starts_with("We study aggregation"));
        assert_eq!(abstract_from_html("<html><body>nothing</body></html>"), None);
    }

    #[tokio::test]
    async fn existing_snapshot_is_used_without_querying() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        save_snapshot(
            &path,
            &[json!({"title": "Cached", "url": "https://x.org/c", "publishedDate": "2019-01-01"})],
        )
        .unwrap();

        let raw = collector(Some(&path)).collect("anything at all", 10).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw.rows()[0]["title"], json!("Cached"));
    }

    #[tokio::test]
    async fn empty_snapshot_means_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "[]").unwrap();

        let err = collector(Some(&path)).collect("transformers", 10).await.unwrap_err();
        assert!(matches!(err, TriageError::NoResults { .. }));
    }
}
