use async_trait::async_trait;
use futures::StreamExt;
use providers::completion::{
    ChatMessage, Completer, CompletionError, CompletionOptions, TokenStream,
};
use providers::embedder::{DeterministicEmbedder, Embedder};
use providers::fallback::FallbackCompleter;
use query::engine::{QueryOptions, QueryPipeline};
use query::prompts::NO_INFORMATION_REPLY;
use query::stream::StreamEvent;
use quarry_core::ingest::plaintext_digest;
use quarry_core::model::{chunk_aad, ChunkRecord, Document};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::cipher::ContentCipher;
use storage::keyvault::KeyVault;
use storage::repo::MemoryDocumentRepository;
use storage::store::EmbeddedStore;
use storage::vector::VectorStore;

const DIM: usize = 32;
const EMBED_MODEL: &str = "embed-test-v1";

struct Harness {
    documents: Arc<MemoryDocumentRepository>,
    store: Arc<EmbeddedStore>,
    keyvault: Arc<KeyVault>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EmbeddedStore::open(dir.path(), DIM).await.unwrap());
    Harness {
        documents: Arc::new(MemoryDocumentRepository::new()),
        keyvault: Arc::new(KeyVault::new([0x77; 32], store.clone())),
        store,
        _dir: dir,
    }
}

impl Harness {
    fn pipeline(&self, completer: Arc<dyn Completer>) -> QueryPipeline {
        QueryPipeline::new(
            self.documents.clone(),
            self.store.clone(),
            self.keyvault.clone(),
            Arc::new(DeterministicEmbedder::new(EMBED_MODEL, DIM)),
            completer,
        )
    }

    /// Register a document and store one encrypted chunk for it. When
    /// `tamper_aad` is set the stored aad names a different document, as if
    /// the row had been rewritten in the database.
    async fn preload_chunk(&self, org: &str, doc: &str, text: &str, tamper_aad: bool) {
        let mut document = Document::new(doc, org, format!("files/{}.pdf", doc));
        document.title = Some(format!("{} report", doc));
        document.mime_type = Some("application/pdf".to_string());
        self.documents.insert(document);

        let dek = self.keyvault.get_or_create(org).await.unwrap();
        let aad = chunk_aad(org, doc, 0);
        let (ciphertext, nonce) = ContentCipher::seal(text.as_bytes(), &dek, &aad).unwrap();

        let stored_aad = if tamper_aad {
            chunk_aad(org, "some-other-doc", 0)
        } else {
            aad
        };

        let embedder = DeterministicEmbedder::new(EMBED_MODEL, DIM);
        let embedding = embedder.embed(&[text.to_string()]).await.unwrap().remove(0);

        self.store
            .upsert_chunks(vec![ChunkRecord {
                org_id: org.to_string(),
                document_id: doc.to_string(),
                chunk_index: 0,
                embedding,
                ciphertext,
                nonce,
                aad: stored_aad,
                plaintext_sha256: plaintext_digest(text),
                section: None,
                page: None,
                created_at: 1,
            }])
            .await
            .unwrap();
    }
}

/// Completer that replays a fixed fragment script and counts invocations.
struct ScriptedCompleter {
    calls: Arc<AtomicUsize>,
    fragments: Vec<&'static str>,
}

impl ScriptedCompleter {
    fn new(fragments: Vec<&'static str>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: calls.clone(),
                fragments,
            }),
            calls,
        )
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items: Vec<Result<String, CompletionError>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Completer whose open call always fails, for failover tests.
struct DownCompleter;

#[async_trait]
impl Completer for DownCompleter {
    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        Err(CompletionError::Unavailable("503 service unavailable".to_string()))
    }

    fn describe(&self) -> String {
        "down".to_string()
    }
}

/// Endless token source that counts what the pipeline pulls from it, so
/// cancellation can be observed from the provider side.
struct TickingCompleter {
    pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl Completer for TickingCompleter {
    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        let pulled = self.pulled.clone();
        let stream = futures::stream::unfold(pulled, |pulled| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pulled.fetch_add(1, Ordering::SeqCst);
            Some((Ok("word ".to_string()), pulled))
        });
        Ok(Box::pin(stream))
    }

    fn describe(&self) -> String {
        "ticking".to_string()
    }
}

fn tokens_of(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn happy_path_streams_answer_citations_usage_done() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (completer, _) = ScriptedCompleter::new(vec![
        "The capital of France",
        " is Paris, according to the provided documents",
        " [doc:doc-fran].",
    ]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask(
            "O1",
            "What is the capital of France?",
            QueryOptions {
                k: 4,
                ..QueryOptions::default()
            },
        )
        .collect()
        .await;

    assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
    assert!(tokens_of(&events).contains("Paris"));

    let citations: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Citations { items } => Some(items),
            _ => None,
        })
        .collect();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].len(), 1);
    assert_eq!(citations[0][0].document_id, "doc-france");

    let usage_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Usage { .. }))
        .expect("usage event");
    assert_eq!(usage_at, events.len() - 2);
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
}

#[tokio::test]
async fn tenant_isolation_yields_no_information_and_no_completion_call() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;
    // O2 needs a key so the pipeline's key lookup is not the short-circuit.
    h.keyvault.get_or_create("O2").await.unwrap();

    let (completer, calls) = ScriptedCompleter::new(vec!["never used"]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask("O2", "What is the capital of France?", QueryOptions::default())
        .collect()
        .await;

    assert_eq!(tokens_of(&events), NO_INFORMATION_REPLY);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Citations { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tampered_aad_skips_chunk_without_surfacing_an_error() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-secret", "The vault code is 4242.", true)
        .await;

    let (completer, calls) = ScriptedCompleter::new(vec!["never used"]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask("O1", "What is the vault code?", QueryOptions::default())
        .collect()
        .await;

    let text = tokens_of(&events);
    assert!(!text.contains("4242"));
    assert_eq!(text, NO_INFORMATION_REPLY);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failover_to_secondary_provider_is_silent() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (secondary, _) = ScriptedCompleter::new(vec![
        "Paris is the capital of France according to your documents, of course.",
    ]);
    let chain = Arc::new(FallbackCompleter::new(vec![
        ("primary".to_string(), Box::new(DownCompleter) as Box<dyn Completer>),
        (
            "secondary".to_string(),
            Box::new(ArcCompleter(secondary.clone())) as Box<dyn Completer>,
        ),
    ]));
    let pipeline = h.pipeline(chain);

    let events: Vec<StreamEvent> = pipeline
        .ask("O1", "What is the capital of France?", QueryOptions::default())
        .collect()
        .await;

    assert!(tokens_of(&events).contains("Paris"));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

/// Box adapter so an `Arc<ScriptedCompleter>` can sit in a fallback chain.
struct ArcCompleter(Arc<ScriptedCompleter>);

#[async_trait]
impl Completer for ArcCompleter {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<TokenStream, CompletionError> {
        self.0.stream(messages, options).await
    }

    fn describe(&self) -> String {
        self.0.describe()
    }
}

#[tokio::test]
async fn client_disconnect_stops_pulling_from_the_provider() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let pulled = Arc::new(AtomicUsize::new(0));
    let pipeline = h.pipeline(Arc::new(TickingCompleter { pulled: pulled.clone() }));

    let mut events = pipeline.ask("O1", "What is the capital?", QueryOptions::default());
    let mut seen_tokens = 0;
    while let Some(event) = events.next().await {
        if matches!(event, StreamEvent::Token { .. }) {
            seen_tokens += 1;
            if seen_tokens >= 2 {
                break;
            }
        }
    }
    drop(events);

    // The driver fills its bounded buffer, hits the closed channel, and
    // releases the provider stream.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let settled = pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), settled);
    assert!(settled < 100, "provider kept streaming after disconnect");
}

#[tokio::test]
async fn refusal_answers_suppress_citations() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (completer, _) = ScriptedCompleter::new(vec!["No information available."]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask("O1", "What is the GDP of Mars?", QueryOptions::default())
        .collect()
        .await;

    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Citations { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn citations_disabled_by_option() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (completer, _) = ScriptedCompleter::new(vec![
        "Paris is the capital of France and has been for many centuries now.",
    ]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask(
            "O1",
            "Capital of France?",
            QueryOptions {
                citations: false,
                ..QueryOptions::default()
            },
        )
        .collect()
        .await;

    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Citations { .. })));
}

#[tokio::test]
async fn think_blocks_never_reach_the_client() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (completer, _) = ScriptedCompleter::new(vec![
        "<think>The user asks about",
        " France; chunk 0 says Paris.</think>",
        "Paris is the capital of France, as your uploaded documents state clearly.",
    ]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask("O1", "Capital of France?", QueryOptions::default())
        .collect()
        .await;

    let text = tokens_of(&events);
    assert!(text.starts_with("Paris is the capital"));
    assert!(!text.contains("<think"));
    assert!(!text.contains("chunk 0"));
}

#[tokio::test]
async fn k_beyond_chunk_count_returns_all_without_duplicates() {
    let h = harness().await;
    h.preload_chunk("O1", "doc-france", "Paris is the capital of France.", false)
        .await;

    let (completer, _) = ScriptedCompleter::new(vec![
        "Paris is the capital of France according to the documents provided here.",
    ]);
    let pipeline = h.pipeline(completer);

    let events: Vec<StreamEvent> = pipeline
        .ask(
            "O1",
            "Capital of France?",
            QueryOptions {
                k: 32,
                ..QueryOptions::default()
            },
        )
        .collect()
        .await;

    let citations = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Citations { items } => Some(items.clone()),
            _ => None,
        })
        .expect("citations event");
    assert_eq!(citations.len(), 1);
}
