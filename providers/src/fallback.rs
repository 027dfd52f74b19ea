use crate::completion::{ChatMessage, Completer, CompletionError, CompletionOptions, TokenStream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

/// Completer wrapper with provider failover.
///
/// Failover happens only while nothing has been emitted: a provider that
/// dies before its first token is silently replaced by the next one in
/// order. Once a token has been yielded the stream is committed — later
/// failures surface to the caller as stream errors.
pub struct FallbackCompleter {
    providers: Vec<(String, Box<dyn Completer>)>,
}

impl FallbackCompleter {
    pub fn new(providers: Vec<(String, Box<dyn Completer>)>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl Completer for FallbackCompleter {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        let mut failures = Vec::new();

        for (name, provider) in &self.providers {
            let mut stream = match provider.stream(messages, options).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(provider = %name, error = %e, "completion provider failed to open, trying next");
                    failures.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            match stream.next().await {
                Some(Ok(first)) => {
                    let committed = futures::stream::once(async move { Ok(first) }).chain(stream);
                    return Ok(Box::pin(committed));
                }
                Some(Err(e)) => {
                    warn!(provider = %name, error = %e, "completion provider failed before first token, trying next");
                    failures.push(format!("{}: {}", name, e));
                }
                None => {
                    // An empty completion is a valid (if silent) answer.
                    return Ok(Box::pin(futures::stream::empty()));
                }
            }
        }

        Err(CompletionError::Unavailable(format!(
            "all completion providers failed: {}",
            failures.join("; ")
        )))
    }

    fn describe(&self) -> String {
        self.providers
            .iter()
            .map(|(name, provider)| format!("{} [{}]", name, provider.describe()))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
