use async_trait::async_trait;
use futures::Stream;
use quarry_core::error::{ErrorCode, QuarryError};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Model selection knob exposed to callers: latency-optimized vs
/// quality-optimized, mapped to concrete model names per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Quality,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Fast => write!(f, "fast"),
            ModelTier::Quality => write!(f, "quality"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub tier: ModelTier,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1500,
            tier: ModelTier::Quality,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion provider unavailable: {0}")]
    Unavailable(String),
    #[error("completion request rejected: {0}")]
    Rejected(String),
    /// No token arrived inside the inactivity window.
    #[error("completion stream stalled")]
    Stalled,
}

impl QuarryError for CompletionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            CompletionError::Unavailable(_) | CompletionError::Stalled => ErrorCode::Unavailable,
            CompletionError::Rejected(_) => ErrorCode::Internal,
        }
    }
}

/// Ordered text fragments from the model. Dropping the stream cancels the
/// underlying provider request.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[async_trait]
pub trait Completer: Send + Sync {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError>;

    /// Human-readable provider/model identity for health reporting.
    fn describe(&self) -> String;
}
