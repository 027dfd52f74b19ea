use quarry_core::embedding::deterministic_embedding;
use quarry_core::ingest::plaintext_digest;
use quarry_core::model::{chunk_aad, ChunkRecord};
use storage::cipher::ContentCipher;
use storage::store::EmbeddedStore;
use storage::vector::VectorStore;

const DIM: usize = 16;

fn row(org: &str, doc: &str, index: u32, text: &str) -> ChunkRecord {
    let dek = [0x42; 32];
    let aad = chunk_aad(org, doc, index);
    let (ciphertext, nonce) = ContentCipher::seal(text.as_bytes(), &dek, &aad).unwrap();
    ChunkRecord {
        org_id: org.to_string(),
        document_id: doc.to_string(),
        chunk_index: index,
        embedding: deterministic_embedding(text, "embed-test-v1", DIM),
        ciphertext,
        nonce,
        aad,
        plaintext_sha256: plaintext_digest(text),
        section: None,
        page: None,
        created_at: 1,
    }
}

async fn open_store(dir: &tempfile::TempDir) -> EmbeddedStore {
    EmbeddedStore::open(dir.path(), DIM).await.unwrap()
}

#[tokio::test]
async fn upsert_overwrites_instead_of_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let rows = vec![
        row("org-1", "doc-1", 0, "alpha"),
        row("org-1", "doc-1", 1, "beta"),
        row("org-1", "doc-1", 2, "gamma"),
    ];
    store.upsert_chunks(rows.clone()).await.unwrap();
    store.upsert_chunks(rows).await.unwrap();

    assert_eq!(store.count_by_document("org-1", "doc-1").await.unwrap(), 3);
}

#[tokio::test]
async fn reingest_keeps_indices_and_hashes_stable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .upsert_chunks(vec![row("org-1", "doc-1", 0, "alpha")])
        .await
        .unwrap();
    let first = store
        .search("org-1", &deterministic_embedding("alpha", "embed-test-v1", DIM), 1)
        .await
        .unwrap();

    // Fresh nonce, same plaintext: ciphertext differs, identity does not.
    store
        .upsert_chunks(vec![row("org-1", "doc-1", 0, "alpha")])
        .await
        .unwrap();
    let second = store
        .search("org-1", &deterministic_embedding("alpha", "embed-test-v1", DIM), 1)
        .await
        .unwrap();

    assert_eq!(store.count_by_document("org-1", "doc-1").await.unwrap(), 1);
    assert_eq!(first[0].record.plaintext_sha256, second[0].record.plaintext_sha256);
    assert_eq!(first[0].record.chunk_index, second[0].record.chunk_index);
    assert_ne!(first[0].record.ciphertext, second[0].record.ciphertext);
}

#[tokio::test]
async fn search_never_crosses_org_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .upsert_chunks(vec![row("org-1", "doc-1", 0, "Paris is the capital of France.")])
        .await
        .unwrap();

    let query = deterministic_embedding("Paris is the capital of France.", "embed-test-v1", DIM);
    let hits = store.search("org-2", &query, 8).await.unwrap();
    assert!(hits.is_empty());

    let own = store.search("org-1", &query, 8).await.unwrap();
    assert_eq!(own.len(), 1);
    assert!(own.iter().all(|hit| hit.record.org_id == "org-1"));
}

#[tokio::test]
async fn search_with_k_beyond_row_count_returns_all_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .upsert_chunks(vec![
            row("org-1", "doc-1", 0, "one"),
            row("org-1", "doc-1", 1, "two"),
        ])
        .await
        .unwrap();

    let hits = store
        .search("org-1", &deterministic_embedding("one", "embed-test-v1", DIM), 32)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    let mut keys: Vec<(String, u32)> = hits
        .iter()
        .map(|h| (h.record.document_id.clone(), h.record.chunk_index))
        .collect();
    keys.dedup();
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn delete_by_document_is_surgical() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .upsert_chunks(vec![
            row("org-1", "doc-1", 0, "keep me"),
            row("org-1", "doc-2", 0, "delete me"),
            row("org-1", "doc-2", 1, "delete me too"),
        ])
        .await
        .unwrap();

    assert_eq!(store.delete_by_document("org-1", "doc-2").await.unwrap(), 2);
    assert_eq!(store.count_by_document("org-1", "doc-1").await.unwrap(), 1);
    assert_eq!(store.count_by_document("org-1", "doc-2").await.unwrap(), 0);
}

#[tokio::test]
async fn rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir).await;
        store
            .upsert_chunks(vec![row("org-1", "doc-1", 0, "durable")])
            .await
            .unwrap();
    }

    let store = open_store(&dir).await;
    assert_eq!(store.count_by_document("org-1", "doc-1").await.unwrap(), 1);

    let hits = store
        .search("org-1", &deterministic_embedding("durable", "embed-test-v1", DIM), 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // The replayed ciphertext still authenticates under its original AAD.
    let record = &hits[0].record;
    let plain = ContentCipher::open(&record.ciphertext, &record.nonce, &record.aad, &[0x42; 32]).unwrap();
    assert_eq!(plain, b"durable");
}

#[tokio::test]
async fn wrong_dimension_rows_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let mut bad = row("org-1", "doc-1", 0, "bad dims");
    bad.embedding = vec![0.5; DIM + 1];

    assert!(store.upsert_chunks(vec![bad]).await.is_err());
    assert_eq!(store.count_by_document("org-1", "doc-1").await.unwrap(), 0);
}

#[tokio::test]
async fn stored_embeddings_keep_unit_norm() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .upsert_chunks(vec![row("org-1", "doc-1", 0, "normed")])
        .await
        .unwrap();

    let hits = store
        .search("org-1", &deterministic_embedding("normed", "embed-test-v1", DIM), 1)
        .await
        .unwrap();
    let norm: f32 = hits[0].record.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((0.99..=1.01).contains(&norm));
}
