//! Vector similarity and bounded pair sampling

/// Cosine similarity of two vectors.
///
/// Returns 0.0 on mismatched dimensions, empty input, or a zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Index pairs `(i, j)` with `i < j <= i + window`, at most `n * window` of them.
pub fn windowed_pairs(n: usize, window: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |i| {
        let end = n.min(i.saturating_add(window).saturating_add(1));
        (i + 1..end).map(move |j| (i, j))
    })
}
