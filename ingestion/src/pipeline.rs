use crate::blob::{BlobError, BlobStore};
use crate::chunker::Chunker;
use crate::extract::{extract_text, ExtractError};
use providers::embedder::{Embedder, EmbedderError};
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::ingest::{plaintext_digest, ContentHash, TextChunk};
use quarry_core::model::{chunk_aad, ChunkRecord, Document};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::cipher::{CipherError, ContentCipher};
use storage::keyvault::{KeyVault, KeyVaultError};
use storage::repo::{DocumentRepository, RepoError};
use storage::vector::VectorStore;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error(transparent)]
    Embedding(#[from] EmbedderError),
    #[error(transparent)]
    Key(#[from] KeyVaultError),
    #[error(transparent)]
    Crypto(#[from] CipherError),
}

impl QuarryError for IngestionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            IngestionError::Repo(e) => e.error_code(),
            IngestionError::Blob(e) => e.error_code(),
            IngestionError::Extraction(e) => e.error_code(),
            IngestionError::Embedding(e) => e.error_code(),
            IngestionError::Key(e) => e.error_code(),
            IngestionError::Crypto(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks_written: usize,
}

/// fetch → extract → chunk → embed → encrypt → upsert, with document status
/// transitions bracketing the run.
///
/// At-least-once semantics: a failed run leaves earlier rows in place for
/// the retry to overwrite, and every failure lands on the document row as a
/// bounded error message.
pub struct IngestionPipeline {
    documents: Arc<dyn DocumentRepository>,
    blobs: Arc<dyn BlobStore>,
    vectors: Arc<dyn VectorStore>,
    keyvault: Arc<KeyVault>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        blobs: Arc<dyn BlobStore>,
        vectors: Arc<dyn VectorStore>,
        keyvault: Arc<KeyVault>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
    ) -> Self {
        Self {
            documents,
            blobs,
            vectors,
            keyvault,
            embedder,
            chunker,
        }
    }

    /// Index one document end to end.
    ///
    /// `NotFound` and `AlreadyRunning` propagate without touching the row;
    /// any failure after the `processing` transition marks the document
    /// `error` before surfacing.
    pub async fn ingest(
        &self,
        org_id: &str,
        document_id: &str,
        force: bool,
    ) -> Result<IngestOutcome, IngestionError> {
        let document = self.claim(org_id, document_id, force).await?;
        self.process(&document).await
    }

    /// Atomically take the `processing` hold on a document. The scheduler
    /// claims at submit time so callers get their 404/409 synchronously.
    pub async fn claim(
        &self,
        org_id: &str,
        document_id: &str,
        force: bool,
    ) -> Result<Document, IngestionError> {
        Ok(self
            .documents
            .begin_processing(org_id, document_id, force)
            .await?)
    }

    /// Run the pipeline over an already-claimed document.
    pub async fn process(&self, document: &Document) -> Result<IngestOutcome, IngestionError> {
        let org_id = document.org_id.as_str();
        let document_id = document.id.as_str();

        match self.run(document).await {
            Ok(outcome) => {
                self.documents
                    .mark_ready(org_id, document_id, &outcome.content_hash, unix_now())
                    .await?;
                info!(
                    org_id,
                    document_id,
                    chunks = outcome.chunks_written,
                    "document indexed"
                );
                Ok(IngestOutcome {
                    document_id: document_id.to_string(),
                    chunks_written: outcome.chunks_written,
                })
            }
            Err(e) => {
                warn!(org_id, document_id, error = %e, "ingestion failed");
                if let Err(mark) = self
                    .documents
                    .mark_error(org_id, document_id, &e.to_string())
                    .await
                {
                    warn!(org_id, document_id, error = %mark, "failed to record document error");
                }
                Err(e)
            }
        }
    }

    /// Cooperative cancellation hook for the scheduler: release the
    /// `processing` hold when a job is torn down before writing chunks.
    pub async fn abandon(&self, org_id: &str, document_id: &str) {
        if let Err(e) = self.documents.reset_to_pending(org_id, document_id).await {
            warn!(org_id, document_id, error = %e, "failed to reset abandoned document");
        }
    }

    /// Record a terminal failure decided outside the pipeline (deadline
    /// overruns in the scheduler).
    pub async fn mark_failed(&self, org_id: &str, document_id: &str, message: &str) {
        if let Err(e) = self.documents.mark_error(org_id, document_id, message).await {
            warn!(org_id, document_id, error = %e, "failed to record document error");
        }
    }

    async fn run(&self, document: &Document) -> Result<RunOutcome, IngestionError> {
        let org_id = document.org_id.as_str();
        let document_id = document.id.as_str();

        let blob = self.blobs.fetch(org_id, document_id).await?;
        let content_hash = blob.bytes[..].content_hash();

        let filename = document
            .title
            .as_deref()
            .unwrap_or_else(|| filename_of(&blob.path));
        let mime_type = document
            .mime_type
            .as_deref()
            .or(blob.mime_type.as_deref())
            .unwrap_or("application/octet-stream");

        let extracted = extract_text(&blob.bytes, mime_type, filename)?;
        let chunks = self.chunker.chunk(&extracted.text);
        if chunks.is_empty() {
            // Nothing to index is still a successful run.
            return Ok(RunOutcome {
                chunks_written: 0,
                content_hash,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let dek = self.keyvault.get_or_create(org_id).await?;
        let written_at = unix_now();

        let mut rows = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(vectors) {
            rows.push(self.seal_chunk(org_id, document_id, chunk, embedding, &dek, written_at)?);
        }

        let written = rows.len();
        self.vectors.upsert_chunks(rows).await?;

        Ok(RunOutcome {
            chunks_written: written,
            content_hash,
        })
    }

    fn seal_chunk(
        &self,
        org_id: &str,
        document_id: &str,
        chunk: &TextChunk,
        embedding: Vec<f32>,
        dek: &[u8; 32],
        written_at: u64,
    ) -> Result<ChunkRecord, IngestionError> {
        let aad = chunk_aad(org_id, document_id, chunk.index);
        let (ciphertext, nonce) = ContentCipher::seal(chunk.text.as_bytes(), dek, &aad)?;

        Ok(ChunkRecord {
            org_id: org_id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: chunk.index,
            embedding,
            ciphertext,
            nonce,
            aad,
            plaintext_sha256: plaintext_digest(&chunk.text),
            section: chunk.section.clone(),
            page: chunk.page,
            created_at: written_at,
        })
    }
}

struct RunOutcome {
    chunks_written: usize,
    content_hash: String,
}

fn filename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
