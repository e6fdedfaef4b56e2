//! Distance and score math shared by every backend.
//!
//! Backends rank by native distance; callers see a similarity score.
//! The mapping per metric:
//!
//! | metric    | distance          | score        |
//! |-----------|-------------------|--------------|
//! | cosine    | 1 - cos(a, b)     | 1 - d/2      |
//! | dot       | -(a · b)          | -d           |
//! | euclidean | ‖a - b‖           | 1 / (1 + d)  |
//!
//! Cosine and euclidean scores land in [0, 1]; dot-product scores are
//! unbounded by construction.

use serde::{Deserialize, Serialize};

/// Distance metric fixed at store construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    DotProduct,
    Euclidean,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dot_product",
            Metric::Euclidean => "euclidean",
        }
    }

    /// Native distance between two equal-length vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::DotProduct => -dot(a, b),
            Metric::Euclidean => euclidean_distance(a, b),
        }
    }

    /// Similarity score derived from a native distance.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance / 2.0,
            Metric::DotProduct => -distance,
            Metric::Euclidean => 1.0 / (1.0 + distance),
        }
    }

    /// Convenience: similarity of two vectors under this metric.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        self.score(self.distance(a, b))
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Cosine of the angle between `a` and `b`; 0 when either is the zero
/// vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot(a, b) / denom
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Maximal Marginal Relevance selection.
///
/// Greedily picks `k` candidate indices maximizing
/// `lambda * sim(query, c) - (1 - lambda) * max_selected_sim(c)`,
/// trading query relevance against redundancy among already-picked
/// results. Similarity is cosine regardless of the store metric.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda: f32,
    k: usize,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let query_sims: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx], &candidates[s]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if redundancy.is_finite() { redundancy } else { 0.0 };
            let score = lambda * query_sims[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn cosine_identical_scores_one() {
        let v = vec![0.3, 0.4, 0.5];
        let d = Metric::Cosine.distance(&v, &v);
        assert!((Metric::Cosine.score(d) - 1.0).abs() < EPS);
    }

    #[test]
    fn cosine_orthogonal_scores_half() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let d = Metric::Cosine.distance(&a, &b);
        assert!((Metric::Cosine.score(d) - 0.5).abs() < EPS);
    }

    #[test]
    fn cosine_opposite_scores_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let d = Metric::Cosine.distance(&a, &b);
        assert!(Metric::Cosine.score(d).abs() < EPS);
    }

    #[test]
    fn dot_product_score_is_unnormalized() {
        let a = vec![2.0, 0.0];
        let b = vec![3.0, 0.0];
        let d = Metric::DotProduct.distance(&a, &b);
        assert!((Metric::DotProduct.score(d) - 6.0).abs() < EPS);
    }

    #[test]
    fn euclidean_score_decays_with_distance() {
        let a = vec![0.0, 0.0];
        let near = vec![0.1, 0.0];
        let far = vec![5.0, 0.0];
        let s_near = Metric::Euclidean.similarity(&a, &near);
        let s_far = Metric::Euclidean.similarity(&a, &far);
        assert!(s_near > s_far);
        assert!((Metric::Euclidean.similarity(&a, &a) - 1.0).abs() < EPS);
    }

    #[test]
    fn zero_vector_cosine_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn mmr_prefers_diverse_results() {
        let query = vec![1.0, 0.0];
        // Two near-duplicates aligned with the query and one diverse
        // candidate. With lambda 0.5 the duplicate should lose to the
        // diverse pick in round two.
        let candidates = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.05],
            vec![0.5, 0.8],
        ];
        let picked = maximal_marginal_relevance(&query, &candidates, 0.5, 2);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn mmr_returns_fewer_when_candidates_exhausted() {
        let picked = maximal_marginal_relevance(&[1.0], &[vec![1.0]], 0.7, 5);
        assert_eq!(picked.len(), 1);
    }
}
