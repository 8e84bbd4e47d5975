//! Maximal marginal relevance re-ranking.
//!
//! Each pick maximizes `λ·sim(query, doc) - (1-λ)·max sim(doc, picked)`, so
//! λ = 1.0 is plain relevance ordering and lower values favour diversity.

use super::distance::cosine_similarity;

/// A retrieval candidate: its position in the caller's list, its query
/// similarity and its vector
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub position: usize,
    pub score: f32,
    pub vector: &'a [f32],
}

/// Select up to `k` candidates by MMR, returning their positions in pick order.
///
/// Candidates should arrive sorted by descending score so that ties resolve
/// to the more relevant one.
#[inline]
pub fn rerank(candidates: &[Candidate<'_>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let lambda = lambda.clamp(0.0, 1.0);

    let mut picked: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while picked.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (slot, &index) in remaining.iter().enumerate() {
            let candidate = &candidates[index];
            let redundancy = picked
                .iter()
                .map(|&chosen| cosine_similarity(candidate.vector, candidates[chosen].vector))
                .fold(0.0_f32, f32::max);
            let mmr = lambda * candidate.score - (1.0 - lambda) * redundancy;

            if best.is_none_or(|(_, best_mmr)| mmr > best_mmr) {
                best = Some((slot, mmr));
            }
        }

        let Some((slot, _)) = best else {
            break;
        };
        picked.push(remaining.remove(slot));
    }

    picked
        .into_iter()
        .map(|index| candidates[index].position)
        .collect()
}
