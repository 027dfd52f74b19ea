use crate::completion::Completer;
use crate::embedder::{DeterministicEmbedder, Embedder};
use crate::fallback::FallbackCompleter;
use crate::http_embedder::{EmbeddingVendor, HttpEmbedder};
use crate::openai_chat::OpenAiCompatibleCompleter;
use quarry_core::config::{CompletionConfig, CompletionProviderConfig, EmbeddingConfig};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown embedding provider: {0}")]
    UnknownEmbeddingProvider(String),
    #[error("no completion providers configured")]
    NoCompletionProviders,
}

/// Resolve the configured embedding backend at startup.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, FactoryError> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "nomic" => Arc::new(HttpEmbedder::new(
            EmbeddingVendor::Nomic,
            config.endpoint.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.dimension,
            config.batch_size,
        )),
        "jina" => Arc::new(HttpEmbedder::new(
            EmbeddingVendor::Jina,
            config.endpoint.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.dimension,
            config.batch_size,
        )),
        "openai" => Arc::new(HttpEmbedder::new(
            EmbeddingVendor::OpenAiCompatible,
            config.endpoint.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.dimension,
            config.batch_size,
        )),
        "deterministic" => Arc::new(DeterministicEmbedder::new(
            config.model.clone(),
            config.dimension,
        )),
        other => return Err(FactoryError::UnknownEmbeddingProvider(other.to_string())),
    };
    Ok(embedder)
}

fn build_one_completer(config: &CompletionProviderConfig) -> Box<dyn Completer> {
    // Every supported generation vendor speaks the OpenAI chat-completions
    // dialect; only the endpoint differs.
    let endpoint = config.endpoint.clone().or_else(|| match config.provider.as_str() {
        "groq" => Some("https://api.groq.com/openai/v1/chat/completions".to_string()),
        "mistral" => Some("https://api.mistral.ai/v1/chat/completions".to_string()),
        _ => None,
    });

    Box::new(OpenAiCompatibleCompleter::new(
        config.provider.clone(),
        endpoint,
        config.api_key.clone(),
        config.model_fast.clone(),
        config.model_quality.clone(),
    ))
}

/// Resolve the completion chain: primary first, fallbacks in listed order.
pub fn build_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>, FactoryError> {
    let mut providers: Vec<(String, Box<dyn Completer>)> = Vec::new();
    providers.push((config.primary.provider.clone(), build_one_completer(&config.primary)));
    for fallback in &config.fallbacks {
        providers.push((fallback.provider.clone(), build_one_completer(fallback)));
    }

    if providers.is_empty() {
        return Err(FactoryError::NoCompletionProviders);
    }
    Ok(Arc::new(FallbackCompleter::new(providers)))
}
