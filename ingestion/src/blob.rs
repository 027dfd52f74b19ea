use async_trait::async_trait;
use dashmap::DashMap;
use quarry_core::error::{ErrorCode, QuarryError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("no stored object for document {document_id} in org {org_id}")]
    NotFound { org_id: String, document_id: String },
    #[error("blob store IO error: {0}")]
    Io(String),
}

impl QuarryError for BlobError {
    fn error_code(&self) -> ErrorCode {
        match self {
            BlobError::NotFound { .. } => ErrorCode::NotFound,
            BlobError::Io(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobObject {
    pub bytes: Vec<u8>,
    pub path: String,
    pub mime_type: Option<String>,
}

/// Read-side of the object store holding raw document bytes. Upload and
/// lifecycle belong to the surrounding platform.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, org_id: &str, document_id: &str) -> Result<BlobObject, BlobError>;
}

/// Filesystem-backed store: `{root}/{org_id}/{document_id}[.ext]`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, org_id: &str, document_id: &str) -> Result<BlobObject, BlobError> {
        let dir = self.root.join(org_id);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|_| BlobError::NotFound {
            org_id: org_id.to_string(),
            document_id: document_id.to_string(),
        })?;

        while let Ok(Some(entry)) = entries.next_entry().await.map_err(|e| BlobError::Io(e.to_string())) {
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem != document_id {
                continue;
            }

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| BlobError::Io(e.to_string()))?;
            return Ok(BlobObject {
                bytes,
                mime_type: mime_from_path(&path),
                path: path.to_string_lossy().into_owned(),
            });
        }

        Err(BlobError::NotFound {
            org_id: org_id.to_string(),
            document_id: document_id.to_string(),
        })
    }
}

/// In-memory store for tests and preloaded fixtures.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: DashMap<(String, String), BlobObject>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        org_id: impl Into<String>,
        document_id: impl Into<String>,
        object: BlobObject,
    ) {
        self.objects.insert((org_id.into(), document_id.into()), object);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, org_id: &str, document_id: &str) -> Result<BlobObject, BlobError> {
        self.objects
            .get(&(org_id.to_string(), document_id.to_string()))
            .map(|o| o.clone())
            .ok_or_else(|| BlobError::NotFound {
                org_id: org_id.to_string(),
                document_id: document_id.to_string(),
            })
    }
}

fn mime_from_path(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime.to_string())
}
