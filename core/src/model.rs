use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// Indexing lifecycle of a document. Only `status`, `rag_error`,
/// `rag_indexed_at` and `content_hash` are mutated by this service; the
/// document row itself is owned by the surrounding platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl std::fmt::Display for IndexingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexingStatus::Pending => "pending",
            IndexingStatus::Processing => "processing",
            IndexingStatus::Ready => "ready",
            IndexingStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub org_id: String,
    pub file_path: String,
    pub title: Option<String>,
    pub mime_type: Option<String>,
    pub status: IndexingStatus,
    pub rag_error: Option<String>,
    /// Unix seconds of the last successful indexing run.
    pub rag_indexed_at: Option<u64>,
    /// SHA-256 hex of the raw document bytes as of the last ingestion.
    pub content_hash: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            file_path: file_path.into(),
            title: None,
            mime_type: None,
            status: IndexingStatus::Pending,
            rag_error: None,
            rag_indexed_at: None,
            content_hash: None,
        }
    }
}

/// One encrypted chunk row as persisted by the vector store.
///
/// `(org_id, document_id, chunk_index)` is the upsert key; re-ingesting a
/// document overwrites rows in place instead of growing the table.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, PartialEq, Clone)]
#[archive(check_bytes)]
pub struct ChunkRecord {
    pub org_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub embedding: Vec<f32>,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 12],
    pub aad: String,
    pub plaintext_sha256: [u8; 32],
    pub section: Option<String>,
    pub page: Option<u32>,
    /// Unix seconds at write time.
    pub created_at: u64,
}

/// Wrapped per-organization data-encryption key. At most one active row per
/// org; `version` is monotonic and starts at 1.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, PartialEq, Clone)]
#[archive(check_bytes)]
pub struct OrgKeyRecord {
    pub org_id: String,
    pub wrapped_dek: Vec<u8>,
    pub nonce: [u8; 12],
    pub version: u32,
    pub created_at: u64,
}

/// Canonical associated-data string binding a chunk to its tenant and
/// document: `{org_id}|{document_id}|{chunk_index}`, UTF-8, no whitespace,
/// no trailing separator. Any mutation of the bound fields invalidates
/// decryption of the chunk.
pub fn chunk_aad(org_id: &str, document_id: &str, chunk_index: u32) -> String {
    format!("{}|{}|{}", org_id, document_id, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_aad_is_canonical() {
        assert_eq!(chunk_aad("org-1", "doc-9", 0), "org-1|doc-9|0");
        assert_eq!(chunk_aad("org-1", "doc-9", 12), "org-1|doc-9|12");
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&IndexingStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
    }
}
