// ── Vector math utilities ──────────────────────────────────────────────
// Embeddings live in SQLite as little-endian f32 BLOBs; these helpers
// convert both ways and provide the similarity math used by retrieval
// and merge scoring.

/// Convert a byte slice (from SQLite BLOB) to a Vec<f32>.
pub(crate) fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Cosine similarity between two vectors. Returns 0.0 on length mismatch
/// or zero-length input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Map an L2 distance between unit vectors to a cosine similarity:
/// `1 − d²/2` (chord-to-cosine).
pub fn chord_similarity(distance: f32) -> f32 {
    1.0 - (distance * distance) / 2.0
}

/// Clamp a similarity into [0, 1].
pub fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

// ── Tests ──────────────────────────────────────────────────────────────
