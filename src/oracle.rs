use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::{OracleError, TriageError};

/// External judge of textual similarity.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    /// Free-text verdict on how `candidate` relates to `reference`.
    async fn compare(&self, reference: &str, candidate: &str) -> Result<String, OracleError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError>;
}

/// Oracle backed by a local Ollama server.
pub struct OllamaOracle {
    ollama: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            ollama: Ollama::new(config.host.clone(), config.port),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }

    /// Fails unless the server answers a model listing.
    pub async fn probe(&self) -> Result<(), OracleError> {
        self.ollama
            .list_local_models()
            .await
            .map(|_| ())
            .map_err(|e| OracleError::Transient(e.to_string()))
    }

    fn prompt(reference: &str, candidate: &str) -> String {
        let preview = truncate_chars(candidate, 1200);
        format!(
            "You are an assistant specialised in the analysis of scientific articles.\n\n\
            Reference research text: \"{}\"\n\n\
            Candidate text: \"{}\"\n\n\
            Compare the candidate with the reference. Rate the relevance from 0.0 to 1.0 and \
            give a one word verdict: \"similar\" when both address the same research problem, \
            \"related\" when they share methods or domain, \"distinct\" otherwise.\n\n\
            Format your response EXACTLY like this:\n\
            SCORE: 0.85\n\
            VERDICT: similar",
            reference, preview
        )
    }
}

#[async_trait]
impl SimilarityOracle for OllamaOracle {
    async fn compare(&self, reference: &str, candidate: &str) -> Result<String, OracleError> {
        let request = GenerationRequest::new(self.model.clone(), Self::prompt(reference, candidate));

        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        Ok(response.response.trim().to_string())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Single(text.to_string()),
        );

        let response = self
            .ollama
            .generate_embeddings(request)
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| OracleError::Malformed("empty embedding".to_string()))
    }
}

/// Adds a per-call timeout and bounded retries of transient failures to any oracle.
pub struct RetryingOracle<O> {
    inner: O,
    attempts: u32,
    timeout: Duration,
    backoff: Duration,
}

impl<O: SimilarityOracle> RetryingOracle<O> {
    pub fn new(inner: O, config: &OracleConfig) -> Self {
        Self {
            inner,
            attempts: config.attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, OracleError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            let outcome = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(op, attempt, max = self.attempts, error = %e, "Oracle call failed, retrying");
                    sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(op, attempt, error = %e, "Oracle call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<O: SimilarityOracle> SimilarityOracle for RetryingOracle<O> {
    async fn compare(&self, reference: &str, candidate: &str) -> Result<String, OracleError> {
        self.with_retry("compare", || self.inner.compare(reference, candidate))
            .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        self.with_retry("embed", || self.inner.embed(text)).await
    }
}

/// Stage name reported when the start-up probe fails.
pub const PROBE_STAGE: &str = "oracle probe";

/// Ollama oracle wrapped in retries, after checking that the server answers.
pub async fn connect(config: &OracleConfig) -> Result<RetryingOracle<OllamaOracle>, TriageError> {
    let ollama = OllamaOracle::new(config);
    ollama.probe().await.map_err(|source| TriageError::Oracle {
        stage: PROBE_STAGE.to_string(),
        source,
    })?;
    info!(model = %config.model, "Ollama available");
    Ok(RetryingOracle::new(ollama, config))
}

/// Cosine similarity; 0.0 when either vector has no magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
