use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single similarity-oracle call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failure: {0}")]
    Transient(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle returned an unusable response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Transport failures and timeouts may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Transient(_) | OracleError::Timeout(_))
    }
}

/// Errors raised while collecting, validating or narrowing a collection.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("{stage}: missing required column(s): {}", .missing.join(", "))]
    Schema { stage: String, missing: Vec<String> },
    #[error("no results collected for query '{query}'")]
    NoResults { query: String },
    #[error("{stage}: no rows left after removing empty '{column}' values")]
    EmptyAfterCleaning { stage: String, column: String },
    #[error("the collected set is empty, nothing to filter")]
    EmptyCollection,
    #[error("{stage} failed: {source}")]
    Oracle {
        stage: String,
        #[source]
        source: OracleError,
    },
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("visualization sink failed for '{name}': {reason}")]
    Sink { name: String, reason: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    pub fn schema(stage: impl Into<String>, missing: Vec<String>) -> Self {
        TriageError::Schema {
            stage: stage.into(),
            missing,
        }
    }
}
