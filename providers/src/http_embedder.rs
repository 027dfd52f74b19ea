use crate::embedder::{Embedder, EmbedderCapabilities, EmbedderError};
use async_trait::async_trait;
use quarry_core::embedding::l2_normalize;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire dialect of the embedding endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingVendor {
    /// Atlas embedding API: `texts` + `task_type` (`search_document` /
    /// `search_query`); the task type replaces textual prefixes.
    Nomic,
    /// `input` array, `data[].embedding` response.
    Jina,
    /// Any OpenAI-compatible `/v1/embeddings` host.
    OpenAiCompatible,
}

impl EmbeddingVendor {
    fn default_endpoint(&self) -> &'static str {
        match self {
            EmbeddingVendor::Nomic => "https://api-atlas.nomic.ai/v1/embedding/text",
            EmbeddingVendor::Jina => "https://api.jina.ai/v1/embeddings",
            EmbeddingVendor::OpenAiCompatible => "https://api.openai.com/v1/embeddings",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EmbeddingVendor::Nomic => "nomic",
            EmbeddingVendor::Jina => "jina",
            EmbeddingVendor::OpenAiCompatible => "openai",
        }
    }
}

/// HTTP embedding client: batches of at most `batch_size` texts, a short
/// sleep between batches for provider rate limits, transient failures
/// retried with exponential backoff.
pub struct HttpEmbedder {
    client: reqwest::Client,
    vendor: EmbeddingVendor,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HttpEmbedder {
    pub fn new(
        vendor: EmbeddingVendor,
        endpoint: Option<String>,
        api_key: String,
        model: String,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .pool_max_idle_per_host(100)
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| vendor.default_endpoint().to_string()),
            vendor,
            api_key,
            model,
            dimension,
            batch_size: batch_size.clamp(1, 50),
        }
    }

    async fn embed_with_intent(
        &self,
        texts: &[String],
        is_query: bool,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];

        // Empty inputs never reach the provider; they keep a zero vector so
        // callers can skip them by inspection.
        let occupied: Vec<(usize, &String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .collect();
        for (i, slot) in out.iter_mut().enumerate() {
            if texts[i].trim().is_empty() {
                *slot = vec![0.0; self.dimension];
            }
        }

        let caps = self.capabilities();
        let prefix = if is_query {
            caps.query_prefix
        } else {
            caps.passage_prefix
        };

        for (batch_no, batch) in occupied.chunks(self.batch_size).enumerate() {
            if batch_no > 0 {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }

            let prefixed: Vec<String> = batch
                .iter()
                .map(|(_, t)| match &prefix {
                    Some(p) => format!("{}{}", p, t),
                    None => (*t).clone(),
                })
                .collect();
            let bodies: Vec<&str> = prefixed.iter().map(|s| s.as_str()).collect();
            let vectors = self.request_batch(&bodies, is_query).await?;
            if vectors.len() != bodies.len() {
                return Err(EmbedderError::Rejected(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    bodies.len()
                )));
            }

            for ((index, _), mut vector) in batch.iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(EmbedderError::WrongDimension {
                        expected: self.dimension,
                        got: vector.len(),
                    });
                }
                l2_normalize(&mut vector);
                out[*index] = vector;
            }
        }

        Ok(out)
    }

    async fn request_batch(
        &self,
        texts: &[&str],
        is_query: bool,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut backoff = BASE_BACKOFF;
        let mut last_error = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            match self.request_once(texts, is_query).await {
                Ok(vectors) => return Ok(vectors),
                Err(RequestFailure::Fatal(message)) => {
                    return Err(EmbedderError::Rejected(message))
                }
                Err(RequestFailure::Transient(message)) => {
                    last_error = message;
                    if attempt + 1 < MAX_ATTEMPTS {
                        warn!(
                            attempt = attempt + 1,
                            error = %last_error,
                            "embedding call failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(EmbedderError::Unavailable(last_error))
    }

    async fn request_once(
        &self,
        texts: &[&str],
        is_query: bool,
    ) -> Result<Vec<Vec<f32>>, RequestFailure> {
        let body = match self.vendor {
            EmbeddingVendor::Nomic => json!({
                "model": self.model,
                "texts": texts,
                "task_type": if is_query { "search_query" } else { "search_document" },
            }),
            EmbeddingVendor::Jina | EmbeddingVendor::OpenAiCompatible => json!({
                "model": self.model,
                "input": texts,
            }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{}: {}", status, truncated_body(response).await);
            return if is_transient_status(status.as_u16()) {
                Err(RequestFailure::Transient(message))
            } else {
                Err(RequestFailure::Fatal(message))
            };
        }

        match self.vendor {
            EmbeddingVendor::Nomic => {
                let parsed: NomicResponse = response
                    .json()
                    .await
                    .map_err(|e| RequestFailure::Fatal(e.to_string()))?;
                Ok(parsed.embeddings)
            }
            EmbeddingVendor::Jina | EmbeddingVendor::OpenAiCompatible => {
                let parsed: OpenAiEmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| RequestFailure::Fatal(e.to_string()))?;
                Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
            }
        }
    }
}

enum RequestFailure {
    Transient(String),
    Fatal(String),
}

fn is_transient_status(code: u16) -> bool {
    code >= 500 || code == 429 || code == 408
}

async fn truncated_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(200);
    body
}

#[derive(Deserialize)]
struct NomicResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.embed_with_intent(texts, false).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let texts = [text.to_string()];
        let mut out = self.embed_with_intent(&texts, true).await?;
        Ok(out.remove(0))
    }

    fn capabilities(&self) -> EmbedderCapabilities {
        // Nomic switches sides via task_type, so no textual prefixes there;
        // prefix-sensitive models served over the generic dialects get the
        // conventional passage/query markers.
        let prefix_sensitive = self.vendor != EmbeddingVendor::Nomic
            && self.model.contains("nomic-embed");
        EmbedderCapabilities {
            provider: self.vendor.name().to_string(),
            model: self.model.clone(),
            dimension: self.dimension,
            passage_prefix: prefix_sensitive.then(|| "passage: ".to_string()),
            query_prefix: prefix_sensitive.then(|| "query: ".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_status_classification() {
        assert!(is_transient_status(500));
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(is_transient_status(408));
        assert!(!is_transient_status(401));
        assert!(!is_transient_status(400));
    }

    #[test]
    fn batch_size_is_clamped_to_provider_limit() {
        let embedder = HttpEmbedder::new(
            EmbeddingVendor::Nomic,
            None,
            "key".into(),
            "nomic-embed-text-v1.5".into(),
            768,
            500,
        );
        assert_eq!(embedder.batch_size, 50);
    }

    #[test]
    fn nomic_capabilities_have_no_prefixes() {
        let embedder = HttpEmbedder::new(
            EmbeddingVendor::Nomic,
            None,
            "key".into(),
            "nomic-embed-text-v1.5".into(),
            768,
            50,
        );
        let caps = embedder.capabilities();
        assert!(caps.passage_prefix.is_none());
        assert!(caps.query_prefix.is_none());
    }

    #[test]
    fn prefix_sensitive_model_over_generic_dialect_gets_prefixes() {
        let embedder = HttpEmbedder::new(
            EmbeddingVendor::OpenAiCompatible,
            Some("http://localhost:9000/v1/embeddings".into()),
            "key".into(),
            "nomic-embed-text-v1.5".into(),
            768,
            50,
        );
        let caps = embedder.capabilities();
        assert_eq!(caps.query_prefix.as_deref(), Some("query: "));
    }
}
