use std::collections::HashMap;

/// Identity of a chunk row inside one organization's index.
pub type ChunkKey = (String, u32);

/// Linear-scan cosine index over one organization's embeddings.
///
/// The scan is exact, which keeps the tie-break contract trivial to honor:
/// equal similarities order by `(document_id, chunk_index)` ascending.
pub struct OrgVectorIndex {
    embeddings: HashMap<ChunkKey, Vec<f32>>,
}

impl OrgVectorIndex {
    pub fn new() -> Self {
        Self {
            embeddings: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: ChunkKey, embedding: Vec<f32>) {
        self.embeddings.insert(key, embedding);
    }

    pub fn remove(&mut self, key: &ChunkKey) -> bool {
        self.embeddings.remove(key).is_some()
    }

    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.embeddings.len();
        self.embeddings.retain(|(doc, _), _| doc != document_id);
        before - self.embeddings.len()
    }

    /// Top-k by cosine similarity, descending, deterministic under ties.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(ChunkKey, f32)> {
        let mut scores: Vec<(ChunkKey, f32)> = self
            .embeddings
            .iter()
            .filter_map(|(key, emb)| cosine_similarity(query, emb).map(|score| (key.clone(), score)))
            .collect();

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(k);
        scores
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

impl Default for OrgVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_a * norm_b))
}
