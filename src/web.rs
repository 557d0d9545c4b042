// Read-only dashboard over the files a funnel run writes to its output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warp::{Filter, Reply};

use crate::record::Record;
use crate::report::FunnelReport;

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

pub async fn start_web_server(out_dir: PathBuf, port: u16) {
    let out_dir = Arc::new(out_dir);
    let dir_filter = warp::any().map(move || out_dir.clone());

    let index = warp::get()
        .and(warp::path::end())
        .map(|| warp::reply::html(index_html()));

    let report = warp::get()
        .and(warp::path("report"))
        .and(warp::path::end())
        .and(dir_filter.clone())
        .map(|dir: Arc<PathBuf>| match FunnelReport::load(&dir) {
            Ok(report) => warp::reply::json(&report).into_response(),
            Err(e) => not_ready(&e.to_string()),
        });

    let records = warp::get()
        .and(warp::path("records"))
        .and(warp::path::end())
        .and(warp::query::<SearchQuery>())
        .and(dir_filter.clone())
        .map(|query: SearchQuery, dir: Arc<PathBuf>| match FunnelReport::load(&dir) {
            Ok(report) => {
                let found = search_records(&report.records, query.q.as_deref());
                warp::reply::json(&found).into_response()
            }
            Err(e) => not_ready(&e.to_string()),
        });

    let chart = warp::get()
        .and(warp::path!("charts" / String))
        .and(dir_filter.clone())
        .map(|file: String, dir: Arc<PathBuf>| chart_file(&dir, &[file.as_str()]));

    let nested_chart = warp::get()
        .and(warp::path!("charts" / String / String))
        .and(dir_filter.clone())
        .map(|group: String, file: String, dir: Arc<PathBuf>| {
            chart_file(&dir, &[group.as_str(), file.as_str()])
        });

    let routes = index.or(report).or(records).or(chart).or(nested_chart);

    info!("Report dashboard running on http://localhost:{}", port);
    warp::serve(routes).run(([127, 0, 0, 1], port)).await;
}

/// Records whose title, snippet or DOI contains `term`, ignoring case.
pub fn search_records<'a>(records: &'a [Record], term: Option<&str>) -> Vec<&'a Record> {
    let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
        return records.iter().collect();
    };

    let term = term.to_lowercase();
    records
        .iter()
        .filter(|r| {
            r.title.to_lowercase().contains(&term)
                || r.snippet.to_lowercase().contains(&term)
                || r.doi.as_deref().is_some_and(|d| d.to_lowercase().contains(&term))
        })
        .collect()
}

fn chart_file(dir: &Path, segments: &[&str]) -> warp::reply::Response {
    if segments
        .iter()
        .any(|s| s.is_empty() || s.starts_with('.') || s.contains(['/', '\\']))
    {
        return status(warp::http::StatusCode::BAD_REQUEST, "Invalid chart name");
    }

    let path = segments.iter().fold(dir.to_path_buf(), |path, s| path.join(s));
    match fs::read_to_string(&path) {
        Ok(body) => warp::reply::with_header(body, "content-type", "application/json").into_response(),
        Err(_) => status(warp::http::StatusCode::NOT_FOUND, "Chart not found"),
    }
}

fn not_ready(reason: &str) -> warp::reply::Response {
    warn!(reason, "Report not available");
    status(
        warp::http::StatusCode::NOT_FOUND,
        "No report yet, run the funnel first",
    )
}

fn status(code: warp::http::StatusCode, message: &str) -> warp::reply::Response {
    let body = StatusMessage {
        status: "error".to_string(),
        message: message.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), code).into_response()
}

fn index_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Paper Funnel</title>
    <style>
        body { font-family: Arial; margin: 20px; background: #f5f5f5; }
        h1 { color: #333; }
        table { border-collapse: collapse; background: white; margin: 10px 0; }
        td, th { border: 1px solid #ddd; padding: 6px 12px; text-align: left; }
        .fallback { color: #856404; background: #fff3cd; }
        .search-bar { margin: 20px 0; }
        input[type="text"] { padding: 8px; width: 400px; }
        button { padding: 8px 16px; background: rgb(100, 149, 237); color: white; border: none; cursor: pointer; }
        .result { background: white; padding: 15px; margin: 10px 0; border: 1px solid #ddd; }
        .result h3 { margin: 0 0 10px 0; }
        .info { color: #666; font-size: 14px; }
        .abstract { margin-top: 10px; padding: 10px; background: #f9f9f9; border-left: 3px solid #007bff; font-size: 14px; }
    </style>
</head>
<body>
    <h1>Paper Funnel</h1>
    <div id="summary"></div>
    <table id="trace"><tr><th>Stage</th><th>Kept</th><th>Filter output</th></tr></table>

    <div class="search-bar">
        <input type="text" id="search_term" placeholder="Search in final articles...">
        <button onclick="loadRecords()">Search</button>
    </div>
    <div id="records"></div>

    <script>
        function loadReport() {
            fetch('/report')
                .then(r => r.json())
                .then(report => {
                    if (!report.trace) {
                        document.getElementById('summary').textContent = report.message;
                        return;
                    }
                    document.getElementById('summary').textContent =
                        'Query: ' + report.query + ' | Reference: ' + report.reference_title +
                        ' | Floor: ' + report.floor + ' | Generated: ' + report.generated_at;
                    const table = document.getElementById('trace');
                    report.trace.forEach(entry => {
                        const row = table.insertRow();
                        if (entry.fell_back) row.className = 'fallback';
                        row.insertCell().textContent = entry.stage;
                        row.insertCell().textContent = entry.size;
                        row.insertCell().textContent = entry.attempted + (entry.fell_back ? ' (fell back)' : '');
                    });
                });
        }

        function loadRecords() {
            const term = document.getElementById('search_term').value;
            fetch('/records?q=' + encodeURIComponent(term))
                .then(r => r.json())
                .then(data => {
                    const container = document.getElementById('records');
                    container.innerHTML = '';
                    if (!Array.isArray(data) || data.length === 0) {
                        container.innerHTML = '<p>No articles found.</p>';
                        return;
                    }
                    data.forEach(paper => {
                        const div = document.createElement('div');
                        div.className = 'result';
                        const title = document.createElement('h3');
                        const link = document.createElement('a');
                        link.href = paper.url;
                        link.target = '_blank';
                        link.textContent = paper.title;
                        title.appendChild(link);
                        const info = document.createElement('div');
                        info.className = 'info';
                        info.textContent = [paper.grouped_venue || paper.normalized_venue, paper.year, paper.doi || '']
                            .filter(Boolean).join(' | ');
                        const abstract = document.createElement('div');
                        abstract.className = 'abstract';
                        abstract.textContent = paper.snippet.length > 300
                            ? paper.snippet.substring(0, 300) + '...'
                            : paper.snippet;
                        div.append(title, info, abstract);
                        container.appendChild(div);
                    });
                });
        }

        loadReport();
        loadRecords();
    </script>
</body>
</html>"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::record;

    #[test]
    fn search_matches_title_snippet_and_doi() {
        let mut with_doi = record("Convolutions", "IEEE", 2020);
        with_doi.doi = Some("10.1109/ABC.2020".to_string());
        let records = vec![record("Sparse Attention", "arXiv", 2021), with_doi];

        assert_eq!(search_records(&records, None).len(), 2);
        assert_eq!(search_records(&records, Some("  ")).len(), 2);
        assert_eq!(search_records(&records, Some("ATTENTION"))[0].title, "Sparse Attention");
        assert_eq!(search_records(&records, Some("abstract of conv"))[0].title, "Convolutions");
        assert_eq!(search_records(&records, Some("10.1109"))[0].title, "Convolutions");
        assert!(search_records(&records, Some("graph")).is_empty());
    }

    #[test]
    fn chart_names_cannot_escape_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("funnel.json"), "{}").unwrap();

        assert_eq!(chart_file(dir.path(), &["funnel.json"]).status(), 200);
        assert_eq!(chart_file(dir.path(), &[".."]).status(), 400);
        assert_eq!(chart_file(dir.path(), &["missing.json"]).status(), 404);
    }
}
