use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::search::normalize;
use crate::backend::BackendConfig;
use crate::error::{RagError, RagResult};

const PROBE_TEXT: &str = "dimension probe";

/// Turns text into unit-length vectors. Index build and query must use the same model.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_documents(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingModel {
            model: self.model().to_string(),
            detail: "no vector returned for query".into(),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

/// Embedder backed by the Ollama `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    request_timeout: Duration,
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OllamaEmbedder {
    /// Resolve the model by embedding a probe text. Fails fast if the model
    /// cannot be loaded, so later calls do not discover it one query at a time.
    pub async fn connect(backend: &BackendConfig, model: &str) -> RagResult<Self> {
        let client = backend.http_client()?;
        let mut embedder = Self {
            client,
            endpoint: backend.endpoint("/api/embed"),
            model: model.to_string(),
            dimensions: 0,
            request_timeout: backend.request_timeout,
        };
        let probe = embedder.request(&[PROBE_TEXT.to_string()]).await?;
        embedder.dimensions = probe.first().map(|v| v.len()).unwrap_or(0);
        if embedder.dimensions == 0 {
            return Err(embedder.failure("probe returned an empty vector"));
        }
        tracing::info!(model, dimensions = embedder.dimensions, "embedding model ready");
        Ok(embedder)
    }

    fn failure(&self, detail: impl std::fmt::Display) -> RagError {
        RagError::EmbeddingModel {
            model: self.model.clone(),
            detail: format!("{detail} (endpoint {})", self.endpoint),
        }
    }

    /// The service stopped answering. Before the model is resolved this is a
    /// model failure; afterwards it is an outage of the shared backend.
    fn unreachable(&self, e: reqwest::Error) -> RagError {
        if self.dimensions == 0 {
            return self.failure(e);
        }
        tracing::warn!(endpoint = %self.endpoint, error = %e, "embedding backend unreachable");
        RagError::BackendUnavailable {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            detail: e.to_string(),
        }
    }

    async fn request(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let body = EmbedRequest { model: &self.model, input: texts };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let status = resp.status();
        let parsed: EmbedResponse = resp.json().await.map_err(|e| {
            if e.is_decode() {
                self.failure(format!("HTTP {status}: {e}"))
            } else {
                self.unreachable(e)
            }
        })?;
        if let Some(err) = parsed.error {
            return Err(self.failure(err));
        }
        if !status.is_success() {
            return Err(self.failure(format!("HTTP {status}")));
        }
        validate_vectors(parsed.embeddings, texts.len(), self.dimensions)
            .map_err(|e| self.failure(e))
    }
}

#[async_trait::async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_documents(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Check count, dimensionality and finiteness, then L2-normalize.
/// `expected_dims == 0` accepts whatever the first vector has.
fn validate_vectors(
    mut vectors: Vec<Vec<f32>>,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, String> {
    if vectors.len() != expected_count {
        return Err(format!(
            "vector count mismatch: got {}, expected {}",
            vectors.len(),
            expected_count
        ));
    }
    let dims = match (expected_dims, vectors.first()) {
        (0, Some(first)) => first.len(),
        (d, _) => d,
    };
    for (i, v) in vectors.iter_mut().enumerate() {
        if v.len() != dims {
            return Err(format!("vector {} has {} dims, expected {}", i, v.len(), dims));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(format!("vector {i} contains non-finite values"));
        }
        normalize(v);
    }
    Ok(vectors)
}
