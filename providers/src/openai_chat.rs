use crate::completion::{
    ChatMessage, Completer, CompletionError, CompletionOptions, ModelTier, TokenStream,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_CHANNEL_DEPTH: usize = 64;

/// Streaming chat completions over the OpenAI-compatible wire dialect
/// (Groq, OpenAI, Mistral's compatible endpoint, local gateways).
///
/// The response is consumed as SSE `data:` lines with a `[DONE]` terminator;
/// tokens are forwarded through a bounded channel so that a dropped consumer
/// tears down the HTTP request on the next send.
pub struct OpenAiCompatibleCompleter {
    client: reqwest::Client,
    provider_name: String,
    endpoint: String,
    api_key: String,
    model_fast: String,
    model_quality: String,
    inactivity_timeout: Duration,
}

impl OpenAiCompatibleCompleter {
    pub fn new(
        provider_name: impl Into<String>,
        endpoint: Option<String>,
        api_key: String,
        model_fast: String,
        model_quality: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CALL_TIMEOUT)
            .pool_max_idle_per_host(100)
            .build()
            .unwrap_or_default();

        Self {
            client,
            provider_name: provider_name.into(),
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            api_key,
            model_fast,
            model_quality,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.model_fast,
            ModelTier::Quality => &self.model_quality,
        }
    }
}

#[async_trait]
impl Completer for OpenAiCompatibleCompleter {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        let model = self.model_for(options.tier).to_string();
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut detail = response.text().await.unwrap_or_default();
            detail.truncate(200);
            let message = format!("{}: {}", status, detail);
            return if status.is_client_error() && status.as_u16() != 429 {
                Err(CompletionError::Rejected(message))
            } else {
                Err(CompletionError::Unavailable(message))
            };
        }

        let (tx, rx) = mpsc::channel::<Result<String, CompletionError>>(TOKEN_CHANNEL_DEPTH);
        let provider = self.provider_name.clone();
        let inactivity = self.inactivity_timeout;

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut line_buffer = String::new();

            loop {
                let next = match tokio::time::timeout(inactivity, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(provider = %provider, "no token inside inactivity window");
                        let _ = tx.send(Err(CompletionError::Stalled)).await;
                        return;
                    }
                };

                let chunk = match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(CompletionError::Unavailable(e.to_string()))).await;
                        return;
                    }
                    None => return,
                };

                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    let line = line.trim();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            let content = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(text) = content {
                                if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                    // Consumer went away: dropping `bytes`
                                    // closes the provider connection.
                                    debug!(provider = %provider, "token consumer dropped, aborting stream");
                                    return;
                                }
                            }
                        }
                        Err(_) => continue,
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn describe(&self) -> String {
        format!(
            "{} (fast={}, quality={})",
            self.provider_name, self.model_fast, self.model_quality
        )
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
