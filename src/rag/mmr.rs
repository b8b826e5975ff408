//! Maximal Marginal Relevance re-ranking.
//!
//! MMR = λ × sim(query, doc) - (1-λ) × max(sim(doc, selected_docs))
//!
//! λ = 1.0: pure relevance (plain similarity order)
//! λ = 0.5: balanced relevance + diversity
//! λ = 0.0: pure diversity

use super::search::dot_similarity;

/// A similarity-ranked candidate. `score` is its cosine similarity to the
/// query and `vector` is unit length.
#[derive(Debug, Clone, Copy)]
pub struct MmrCandidate<'a> {
    pub rank: usize,
    pub score: f32,
    pub vector: &'a [f32],
}

/// Greedily pick up to `k` candidates, returning their `rank`s in pick order.
/// `candidates` must be sorted best-first; equal MMR scores go to the earlier one.
pub fn mmr_rerank(candidates: &[MmrCandidate<'_>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let mut picked = Vec::with_capacity(k);
    let mut taken = vec![false; candidates.len()];
    // Highest similarity of each candidate to anything picked so far.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while picked.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (i, c) in candidates.iter().enumerate() {
            if taken[i] {
                continue;
            }
            let penalty = if redundancy[i].is_finite() { redundancy[i] } else { 0.0 };
            let mmr = lambda * c.score - (1.0 - lambda) * penalty;
            if best.map_or(true, |(_, b)| mmr > b) {
                best = Some((i, mmr));
            }
        }
        let Some((chosen, _)) = best else { break };
        taken[chosen] = true;
        picked.push(candidates[chosen].rank);

        let chosen_vec = candidates[chosen].vector;
        for (i, c) in candidates.iter().enumerate() {
            if !taken[i] {
                redundancy[i] = redundancy[i].max(dot_similarity(c.vector, chosen_vec));
            }
        }
    }

    picked
}
