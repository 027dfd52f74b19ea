use crate::context::{build_context, RetrievedChunk};
use crate::prompts::{citations_warranted, user_prompt, NO_INFORMATION_REPLY, SYSTEM_PROMPT};
use crate::stream::{Citation, StreamEvent};
use crate::think::ThinkTagFilter;
use futures::{Stream, StreamExt};
use providers::completion::{
    ChatMessage, Completer, CompletionError, CompletionOptions, ModelTier,
};
use providers::embedder::{Embedder, EmbedderError};
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::model::chunk_aad;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use storage::cipher::ContentCipher;
use storage::keyvault::{KeyVault, KeyVaultError};
use storage::repo::{DocumentRepository, RepoError};
use storage::vector::VectorStore;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info_span, warn, Instrument};

const K_RANGE: std::ops::RangeInclusive<usize> = 1..=32;
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const TOTAL_QUERY_TIMEOUT: Duration = Duration::from_secs(90);
const EVENT_CHANNEL_DEPTH: usize = 32;
const CHARS_PER_TOKEN: u64 = 4;

/// What the client sees when anything fails mid-stream. Details stay in
/// the logs; the wire gets one stable sentence.
const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Retrieval depth, clamped to 1..=32.
    pub k: usize,
    /// Select the latency-optimized completion tier.
    pub fast_mode: bool,
    /// Emit a citations event after the answer.
    pub citations: bool,
    /// Caller-supplied id, stamped into logs only.
    pub correlation_id: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: 8,
            fast_mode: false,
            citations: true,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Error)]
enum QueryError {
    #[error(transparent)]
    Embedding(#[from] EmbedderError),
    #[error("query embedding timed out")]
    EmbedTimeout,
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error(transparent)]
    Key(#[from] KeyVaultError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// The client went away; tear down silently.
    #[error("client disconnected")]
    Cancelled,
}

impl QuarryError for QueryError {
    fn error_code(&self) -> ErrorCode {
        match self {
            QueryError::Embedding(e) => e.error_code(),
            QueryError::EmbedTimeout => ErrorCode::Unavailable,
            QueryError::Store(e) => e.error_code(),
            QueryError::Key(e) => e.error_code(),
            QueryError::Completion(e) => e.error_code(),
            QueryError::Cancelled => ErrorCode::Internal,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// embed → retrieve → decrypt → assemble → stream → cite.
///
/// `ask` returns immediately with the event stream; the work happens in a
/// driver task that stops at the first failed send, so a disconnected
/// client cancels retrieval and the upstream completion call together.
#[derive(Clone)]
pub struct QueryPipeline {
    documents: Arc<dyn DocumentRepository>,
    vectors: Arc<dyn VectorStore>,
    keyvault: Arc<KeyVault>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
}

impl QueryPipeline {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        vectors: Arc<dyn VectorStore>,
        keyvault: Arc<KeyVault>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        Self {
            documents,
            vectors,
            keyvault,
            embedder,
            completer,
        }
    }

    pub fn ask(&self, org_id: &str, question: &str, options: QueryOptions) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let pipeline = self.clone();
        let org_id = org_id.to_string();
        let question = question.to_string();

        tokio::spawn(async move {
            let correlation_id = options.correlation_id.clone().unwrap_or_default();
            let span = info_span!("rag_query", org_id = %org_id, correlation_id = %correlation_id);

            async {
                let outcome = tokio::time::timeout(
                    TOTAL_QUERY_TIMEOUT,
                    pipeline.drive(&org_id, &question, &options, &tx),
                )
                .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(QueryError::Cancelled)) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "query pipeline failed");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: GENERIC_ERROR_MESSAGE.to_string(),
                            })
                            .await;
                    }
                    Err(_) => {
                        warn!(budget_secs = TOTAL_QUERY_TIMEOUT.as_secs(), "query exceeded total budget");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: GENERIC_ERROR_MESSAGE.to_string(),
                            })
                            .await;
                    }
                }
            }
            .instrument(span)
            .await
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(
        &self,
        org_id: &str,
        question: &str,
        options: &QueryOptions,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), QueryError> {
        send(
            tx,
            StreamEvent::Start {
                conversation_id: uuid::Uuid::new_v4().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await?;

        let k = options.k.clamp(*K_RANGE.start(), *K_RANGE.end());
        let query_vector = tokio::time::timeout(EMBED_TIMEOUT, self.embedder.embed_query(question))
            .await
            .map_err(|_| QueryError::EmbedTimeout)??;

        let hits = self.vectors.search(org_id, &query_vector, k).await?;
        if hits.is_empty() {
            return self.no_information(tx).await;
        }

        let dek = self.keyvault.get(org_id).await?;
        let chunks = self.decrypt_hits(org_id, hits, &dek).await;
        if chunks.is_empty() {
            return self.no_information(tx).await;
        }

        let context = build_context(&chunks);
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(&context, question)),
        ];
        let tier = if options.fast_mode {
            ModelTier::Fast
        } else {
            ModelTier::Quality
        };
        let completion_options = CompletionOptions {
            tier,
            ..CompletionOptions::default()
        };

        let mut tokens = self.completer.stream(&messages, &completion_options).await?;
        let mut filter = ThinkTagFilter::new();
        let mut answer = String::new();

        while let Some(item) = tokens.next().await {
            let fragment = item?;
            let visible = filter.push(&fragment);
            if !visible.is_empty() {
                answer.push_str(&visible);
                send(tx, StreamEvent::Token { text: visible }).await?;
            }
        }
        let tail = filter.finish();
        if !tail.is_empty() {
            answer.push_str(&tail);
            send(tx, StreamEvent::Token { text: tail }).await?;
        }

        if options.citations && citations_warranted(&answer) {
            send(
                tx,
                StreamEvent::Citations {
                    items: chunks.iter().map(to_citation).collect(),
                },
            )
            .await?;
        }

        let tokens_input =
            (context.chars().count() as u64 + question.chars().count() as u64) / CHARS_PER_TOKEN;
        let tokens_output = answer.chars().count() as u64 / CHARS_PER_TOKEN;
        send(
            tx,
            StreamEvent::Usage {
                tokens_input,
                tokens_output,
                model: tier.to_string(),
            },
        )
        .await?;

        send(tx, StreamEvent::Done).await
    }

    async fn no_information(&self, tx: &mpsc::Sender<StreamEvent>) -> Result<(), QueryError> {
        send(
            tx,
            StreamEvent::Token {
                text: NO_INFORMATION_REPLY.to_string(),
            },
        )
        .await?;
        send(tx, StreamEvent::Done).await
    }

    /// Decrypt retrieval hits and join them with document metadata. Chunks
    /// that fail authentication are skipped, never surfaced.
    async fn decrypt_hits(
        &self,
        org_id: &str,
        hits: Vec<storage::vector::ScoredChunk>,
        dek: &[u8; 32],
    ) -> Vec<RetrievedChunk> {
        let mut titles: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();
        let mut out = Vec::with_capacity(hits.len());

        for hit in hits {
            let record = hit.record;

            // The stored aad must match the row's own coordinates; a
            // rewritten aad column or a re-homed row both fail here or in
            // the cipher, never reaching the context.
            let canonical = chunk_aad(&record.org_id, &record.document_id, record.chunk_index);
            if record.aad != canonical {
                warn!(
                    org_id,
                    document_id = %record.document_id,
                    chunk_index = record.chunk_index,
                    "chunk aad does not match its row coordinates, skipping"
                );
                continue;
            }

            let plaintext = match ContentCipher::open(&record.ciphertext, &record.nonce, &record.aad, dek)
            {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    warn!(
                        org_id,
                        document_id = %record.document_id,
                        chunk_index = record.chunk_index,
                        "chunk failed integrity check, skipping"
                    );
                    continue;
                }
            };

            let (title, mime_type) = match titles.get(&record.document_id) {
                Some(meta) => meta.clone(),
                None => {
                    let meta = match self.documents.get(org_id, &record.document_id).await {
                        Ok(doc) => {
                            let title = doc.title.or_else(|| {
                                doc.file_path.rsplit('/').next().map(|s| s.to_string())
                            });
                            (title, doc.mime_type)
                        }
                        Err(_) => (None, None),
                    };
                    titles.insert(record.document_id.clone(), meta.clone());
                    meta
                }
            };

            out.push(RetrievedChunk {
                document_id: record.document_id,
                document_title: title,
                mime_type,
                chunk_index: record.chunk_index,
                section: record.section,
                page: record.page,
                similarity: hit.similarity,
                text: plaintext,
            });
        }

        out
    }
}

fn to_citation(chunk: &RetrievedChunk) -> Citation {
    Citation {
        document_id: chunk.document_id.clone(),
        document_title: chunk.document_title.clone(),
        chunk_index: chunk.chunk_index,
        section: chunk.section.clone(),
        page: chunk.page,
        score: (chunk.similarity * 1000.0).round() / 1000.0,
    }
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), QueryError> {
    tx.send(event).await.map_err(|_| QueryError::Cancelled)
}
