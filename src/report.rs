use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::funnel::{FunnelTrace, Reference, TraceEntry};
use crate::record::Record;

pub const REPORT_FILE: &str = "report.json";

/// Everything a finished run leaves behind for people to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelReport {
    pub generated_at: DateTime<Local>,
    pub query: String,
    pub reference_title: String,
    pub floor: usize,
    pub trace: Vec<TraceEntry>,
    pub ranked: bool,
    pub records: Vec<Record>,
}

impl FunnelReport {
    pub fn new(
        query: &str,
        reference: &Reference,
        floor: usize,
        trace: &FunnelTrace,
        records: Vec<Record>,
        ranked: bool,
    ) -> Self {
        Self {
            generated_at: Local::now(),
            query: query.to_string(),
            reference_title: reference.title.clone(),
            floor,
            trace: trace.entries().to_vec(),
            ranked,
            records,
        }
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, TriageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> Result<Self, TriageError> {
        let contents = fs::read_to_string(dir.join(REPORT_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }
}
