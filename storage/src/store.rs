use crate::index::OrgVectorIndex;
use crate::repo::{OrgKeyRepository, RepoError};
use crate::vector::{ScoredChunk, VectorStore};
use crate::wal::Wal;
use async_trait::async_trait;
use quarry_core::model::{ChunkRecord, OrgKeyRecord};
use rkyv::ser::{serializers::AllocSerializer, Serializer};
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

const WAL_FILE: &str = "store.wal";

/// `(org_id, document_id, chunk_index)` — the upsert identity of a row.
type RowKey = (String, String, u32);

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
enum WalEntry {
    UpsertChunks(Vec<ChunkRecord>),
    DeleteDocument { org_id: String, document_id: String },
    PutOrgKey(OrgKeyRecord),
}

struct StoreState {
    chunks: HashMap<RowKey, ChunkRecord>,
    indexes: HashMap<String, OrgVectorIndex>,
    org_keys: HashMap<String, OrgKeyRecord>,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            chunks: HashMap::new(),
            indexes: HashMap::new(),
            org_keys: HashMap::new(),
        }
    }

    fn apply(&mut self, entry: WalEntry) {
        match entry {
            WalEntry::UpsertChunks(rows) => {
                for row in rows {
                    let key: RowKey = (row.org_id.clone(), row.document_id.clone(), row.chunk_index);
                    self.indexes
                        .entry(row.org_id.clone())
                        .or_default()
                        .insert((row.document_id.clone(), row.chunk_index), row.embedding.clone());
                    self.chunks.insert(key, row);
                }
            }
            WalEntry::DeleteDocument { org_id, document_id } => {
                self.chunks
                    .retain(|(org, doc, _), _| !(*org == org_id && *doc == document_id));
                if let Some(index) = self.indexes.get_mut(&org_id) {
                    index.remove_document(&document_id);
                }
            }
            WalEntry::PutOrgKey(record) => {
                self.org_keys.insert(record.org_id.clone(), record);
            }
        }
    }
}

/// WAL-backed chunk and org-key store with an in-memory materialized state
/// and a per-org cosine index.
///
/// Single-node stand-in for a relational vector store; tenant isolation is
/// structural because every index is keyed by org before any ranking runs.
pub struct EmbeddedStore {
    state: RwLock<StoreState>,
    wal: Mutex<Wal>,
    dimension: usize,
}

impl EmbeddedStore {
    pub async fn open(data_dir: impl AsRef<Path>, dimension: usize) -> Result<Self, RepoError> {
        let path = data_dir.as_ref().join(WAL_FILE);
        let (wal, payloads) = Wal::open(&path)
            .await
            .map_err(|e| RepoError::Backend(e.to_string()))?;

        let mut state = StoreState::empty();
        let replayed = payloads.len();
        for payload in payloads {
            state.apply(decode_entry(&payload)?);
        }
        if replayed > 0 {
            info!(entries = replayed, rows = state.chunks.len(), "replayed chunk store WAL");
        }

        Ok(Self {
            state: RwLock::new(state),
            wal: Mutex::new(wal),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn log_and_apply(&self, entry: WalEntry) -> Result<(), RepoError> {
        let payload = encode_entry(&entry)?;

        let mut wal = self.wal.lock().await;
        wal.append(&payload)
            .await
            .map_err(|e| RepoError::Backend(e.to_string()))?;

        let mut state = self.state.write().await;
        state.apply(entry);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for EmbeddedStore {
    async fn upsert_chunks(&self, rows: Vec<ChunkRecord>) -> Result<(), RepoError> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in &rows {
            if row.embedding.len() != self.dimension {
                return Err(RepoError::DimensionMismatch {
                    expected: self.dimension,
                    got: row.embedding.len(),
                });
            }
        }

        self.log_and_apply(WalEntry::UpsertChunks(rows)).await
    }

    async fn search(
        &self,
        org_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RepoError> {
        let state = self.state.read().await;

        let Some(index) = state.indexes.get(org_id) else {
            return Ok(Vec::new());
        };

        let hits = index.search(query, k);
        let mut out = Vec::with_capacity(hits.len());
        for ((document_id, chunk_index), similarity) in hits {
            let key: RowKey = (org_id.to_string(), document_id, chunk_index);
            if let Some(record) = state.chunks.get(&key) {
                out.push(ScoredChunk {
                    record: record.clone(),
                    similarity,
                });
            }
        }
        Ok(out)
    }

    async fn delete_by_document(
        &self,
        org_id: &str,
        document_id: &str,
    ) -> Result<usize, RepoError> {
        let removed = {
            let state = self.state.read().await;
            state
                .chunks
                .keys()
                .filter(|(org, doc, _)| org == org_id && doc == document_id)
                .count()
        };
        if removed == 0 {
            return Ok(0);
        }

        self.log_and_apply(WalEntry::DeleteDocument {
            org_id: org_id.to_string(),
            document_id: document_id.to_string(),
        })
        .await?;
        Ok(removed)
    }

    async fn count_by_document(
        &self,
        org_id: &str,
        document_id: &str,
    ) -> Result<usize, RepoError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .keys()
            .filter(|(org, doc, _)| org == org_id && doc == document_id)
            .count())
    }
}

#[async_trait]
impl OrgKeyRepository for EmbeddedStore {
    async fn get_org_key(&self, org_id: &str) -> Result<Option<OrgKeyRecord>, RepoError> {
        let state = self.state.read().await;
        Ok(state.org_keys.get(org_id).cloned())
    }

    async fn put_org_key(&self, record: OrgKeyRecord) -> Result<OrgKeyRecord, RepoError> {
        {
            let state = self.state.read().await;
            if let Some(existing) = state.org_keys.get(&record.org_id) {
                return Ok(existing.clone());
            }
        }

        self.log_and_apply(WalEntry::PutOrgKey(record.clone())).await?;
        Ok(record)
    }
}

fn encode_entry(entry: &WalEntry) -> Result<Vec<u8>, RepoError> {
    let mut serializer = AllocSerializer::<1024>::default();
    serializer
        .serialize_value(entry)
        .map_err(|_| RepoError::Backend("WAL entry serialization failed".to_string()))?;
    Ok(serializer.into_serializer().into_inner().to_vec())
}

fn decode_entry(payload: &[u8]) -> Result<WalEntry, RepoError> {
    let archived = rkyv::check_archived_root::<WalEntry>(payload)
        .map_err(|_| RepoError::Backend("WAL entry failed validation".to_string()))?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| RepoError::Backend("WAL entry deserialization failed".to_string()))
}
