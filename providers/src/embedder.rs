use async_trait::async_trait;
use quarry_core::embedding::deterministic_embedding;
use quarry_core::error::{ErrorCode, QuarryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedderError {
    /// Transient failures exhausted their retries, or the provider is down.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Authentication or malformed-request errors; retrying cannot help.
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    #[error("embedding provider returned {got}-dimensional vectors, expected {expected}")]
    WrongDimension { expected: usize, got: usize },
}

impl QuarryError for EmbedderError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EmbedderError::Unavailable(_) => ErrorCode::Unavailable,
            EmbedderError::Rejected(_) => ErrorCode::Internal,
            EmbedderError::WrongDimension { .. } => ErrorCode::Internal,
        }
    }
}

/// What a provider's embedding model expects, surfaced so callers can reason
/// about prefix sensitivity without knowing vendors.
#[derive(Debug, Clone)]
pub struct EmbedderCapabilities {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    /// Prefix applied to passages at index time, when the model wants one.
    pub passage_prefix: Option<String>,
    /// Prefix applied to questions at query time.
    pub query_prefix: Option<String>,
}

impl EmbedderCapabilities {
    pub fn describe(&self) -> String {
        format!("{}-{} ({}d)", self.provider, self.model, self.dimension)
    }
}

/// Batched text embedding. Implementations guarantee:
/// - `embed(texts).len() == texts.len()`, every vector of length D;
/// - all vectors unit-L2-normalized, so cosine reduces to dot product;
/// - empty input strings map to the zero vector rather than an error.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed passages for indexing.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Embed a query; prefix-sensitive models get the query-side treatment.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    fn capabilities(&self) -> EmbedderCapabilities;
}

/// Offline embedder: content-addressed vectors from the core hash embedding.
/// Backs tests and development without provider credentials.
pub struct DeterministicEmbedder {
    model: String,
    dimension: usize,
}

impl DeterministicEmbedder {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension: dimension.max(1),
        }
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new("deterministic-v1", 768)
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.trim().is_empty() {
                    vec![0.0; self.dimension]
                } else {
                    deterministic_embedding(text, &self.model, self.dimension)
                }
            })
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut out = self.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(out.remove(0))
    }

    fn capabilities(&self) -> EmbedderCapabilities {
        EmbedderCapabilities {
            provider: "deterministic".to_string(),
            model: self.model.clone(),
            dimension: self.dimension,
            passage_prefix: None,
            query_prefix: None,
        }
    }
}
