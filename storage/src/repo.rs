use async_trait::async_trait;
use dashmap::DashMap;
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::model::{Document, IndexingStatus, OrgKeyRecord};
use thiserror::Error;

/// Error messages persisted to the document row are capped at this length.
pub const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("document {0} is already being indexed")]
    AlreadyRunning(String),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl QuarryError for RepoError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RepoError::DocumentNotFound(_) => ErrorCode::NotFound,
            RepoError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            RepoError::DimensionMismatch { .. } => ErrorCode::InvalidArgument,
            RepoError::Backend(_) => ErrorCode::Internal,
        }
    }
}

/// Read/update access to document rows. The surrounding platform owns the
/// table; this service only transitions the indexing fields.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get(&self, org_id: &str, document_id: &str) -> Result<Document, RepoError>;

    /// Atomically move a document into `processing`.
    ///
    /// Fails with `AlreadyRunning` while another run holds the row, and
    /// refuses documents already `ready` unless `force` is set.
    async fn begin_processing(
        &self,
        org_id: &str,
        document_id: &str,
        force: bool,
    ) -> Result<Document, RepoError>;

    async fn mark_ready(
        &self,
        org_id: &str,
        document_id: &str,
        content_hash: &str,
        indexed_at: u64,
    ) -> Result<(), RepoError>;

    /// Record a terminal failure. The message is truncated to
    /// [`MAX_ERROR_LEN`] before it is stored.
    async fn mark_error(
        &self,
        org_id: &str,
        document_id: &str,
        message: &str,
    ) -> Result<(), RepoError>;

    /// Cancellation path: release the `processing` hold without recording an
    /// error, returning the row to `pending`.
    async fn reset_to_pending(&self, org_id: &str, document_id: &str) -> Result<(), RepoError>;
}

/// Persistence of wrapped per-org DEKs.
#[async_trait]
pub trait OrgKeyRepository: Send + Sync {
    async fn get_org_key(&self, org_id: &str) -> Result<Option<OrgKeyRecord>, RepoError>;

    /// Insert the wrapped key for an org. Returns the stored row; when a row
    /// already exists (lost race on first encryption), the existing row wins
    /// and is returned unchanged.
    async fn put_org_key(&self, record: OrgKeyRecord) -> Result<OrgKeyRecord, RepoError>;
}

/// In-process document table keyed by `(org, document)`.
///
/// Stands in for the platform's relational store in tests and single-node
/// deployments; documents are registered by the caller before indexing.
#[derive(Default)]
pub struct MemoryDocumentRepository {
    rows: DashMap<(String, String), Document>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Document) {
        self.rows
            .insert((document.org_id.clone(), document.id.clone()), document);
    }

    pub fn remove(&self, org_id: &str, document_id: &str) -> Option<Document> {
        self.rows
            .remove(&(org_id.to_string(), document_id.to_string()))
            .map(|(_, doc)| doc)
    }
}

fn key(org_id: &str, document_id: &str) -> (String, String) {
    (org_id.to_string(), document_id.to_string())
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn get(&self, org_id: &str, document_id: &str) -> Result<Document, RepoError> {
        self.rows
            .get(&key(org_id, document_id))
            .map(|row| row.clone())
            .ok_or_else(|| RepoError::DocumentNotFound(document_id.to_string()))
    }

    async fn begin_processing(
        &self,
        org_id: &str,
        document_id: &str,
        force: bool,
    ) -> Result<Document, RepoError> {
        let mut row = self
            .rows
            .get_mut(&key(org_id, document_id))
            .ok_or_else(|| RepoError::DocumentNotFound(document_id.to_string()))?;

        match row.status {
            IndexingStatus::Processing => {
                return Err(RepoError::AlreadyRunning(document_id.to_string()))
            }
            IndexingStatus::Ready if !force => {
                return Err(RepoError::AlreadyRunning(document_id.to_string()))
            }
            _ => {}
        }

        row.status = IndexingStatus::Processing;
        row.rag_error = None;
        Ok(row.clone())
    }

    async fn mark_ready(
        &self,
        org_id: &str,
        document_id: &str,
        content_hash: &str,
        indexed_at: u64,
    ) -> Result<(), RepoError> {
        let mut row = self
            .rows
            .get_mut(&key(org_id, document_id))
            .ok_or_else(|| RepoError::DocumentNotFound(document_id.to_string()))?;
        row.status = IndexingStatus::Ready;
        row.rag_error = None;
        row.rag_indexed_at = Some(indexed_at);
        row.content_hash = Some(content_hash.to_string());
        Ok(())
    }

    async fn mark_error(
        &self,
        org_id: &str,
        document_id: &str,
        message: &str,
    ) -> Result<(), RepoError> {
        let mut row = self
            .rows
            .get_mut(&key(org_id, document_id))
            .ok_or_else(|| RepoError::DocumentNotFound(document_id.to_string()))?;
        row.status = IndexingStatus::Error;
        row.rag_error = Some(truncate_error(message));
        Ok(())
    }

    async fn reset_to_pending(&self, org_id: &str, document_id: &str) -> Result<(), RepoError> {
        let mut row = self
            .rows
            .get_mut(&key(org_id, document_id))
            .ok_or_else(|| RepoError::DocumentNotFound(document_id.to_string()))?;
        if row.status == IndexingStatus::Processing {
            row.status = IndexingStatus::Pending;
        }
        Ok(())
    }
}

pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
