use crate::repo::RepoError;
use async_trait::async_trait;
use quarry_core::model::ChunkRecord;

/// A search hit: the stored row plus its cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    pub similarity: f32,
}

/// Persistence and retrieval of encrypted chunk rows.
///
/// Contracts:
/// - `upsert_chunks` is idempotent on `(org, document, index)`; re-ingesting
///   a document overwrites rows without growing the table.
/// - `search` scopes by org before ranking — a query for one tenant can
///   never see another tenant's rows — and returns fewer than `k` hits when
///   fewer exist. Ties break by `(document_id, chunk_index)` ascending.
/// - `delete_by_document` removes exactly the chunks of that document.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_chunks(&self, rows: Vec<ChunkRecord>) -> Result<(), RepoError>;

    async fn search(
        &self,
        org_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RepoError>;

    async fn delete_by_document(
        &self,
        org_id: &str,
        document_id: &str,
    ) -> Result<usize, RepoError>;

    /// Number of rows stored for a document. Used by status reporting and
    /// idempotence checks.
    async fn count_by_document(
        &self,
        org_id: &str,
        document_id: &str,
    ) -> Result<usize, RepoError>;
}
