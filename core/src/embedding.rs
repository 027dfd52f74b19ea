use sha2::{Digest, Sha256};

/// Scale a vector to unit L2 length. Zero vectors stay zero so that empty
/// inputs keep their sentinel embedding.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Content-addressed embedding used by tests and offline mode. The output
/// depends only on `(model_id, text)` and is unit-normalized, so similarity
/// ranking is reproducible without a provider.
pub fn deterministic_embedding(text: &str, model_id: &str, dims: usize) -> Vec<f32> {
    let dims = dims.max(1);

    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut out = Vec::with_capacity(dims);
    for i in 0..dims {
        let byte = digest[i % digest.len()];
        let value = (byte as f32 / 127.5) - 1.0;
        out.push(value);
    }

    l2_normalize(&mut out);
    out
}
