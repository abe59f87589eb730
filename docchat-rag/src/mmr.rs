//! Maximal marginal relevance selection.
//!
//! Each step picks the candidate maximizing
//! `λ · sim(query, d) − (1 − λ) · max sim(d, selected)`:
//! `λ = 1` is pure relevance, `λ = 0` pure diversity.

use crate::embedding::cosine_similarity;

/// A candidate for MMR selection.
#[derive(Debug, Clone, Copy)]
pub struct MmrCandidate<'a> {
    /// Similarity between the candidate and the query.
    pub relevance: f32,
    /// The candidate's embedding.
    pub vector: &'a [f32],
}

/// Select up to `k` candidates by MMR and return their indices in selection order.
///
/// Candidates are expected most relevant first. When two candidates score
/// the same, the one earlier in `candidates` wins.
pub fn mmr_select(candidates: &[MmrCandidate<'_>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(k);
    // Running max similarity of each candidate to anything already selected.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];
    let mut taken = vec![false; candidates.len()];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            if taken[idx] {
                continue;
            }
            let penalty = if selected.is_empty() { 0.0 } else { redundancy[idx] };
            let score = lambda * candidate.relevance - (1.0 - lambda) * penalty;
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }

        let Some((chosen, _)) = best else { break };
        taken[chosen] = true;
        selected.push(chosen);

        let chosen_vector = candidates[chosen].vector;
        for (idx, candidate) in candidates.iter().enumerate() {
            if !taken[idx] {
                let sim = cosine_similarity(candidate.vector, chosen_vector);
                redundancy[idx] = redundancy[idx].max(sim);
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates<'a>(query: &[f32], vectors: &'a [Vec<f32>]) -> Vec<MmrCandidate<'a>> {
        vectors
            .iter()
            .map(|v| MmrCandidate { relevance: cosine_similarity(query, v), vector: v })
            .collect()
    }

    #[test]
    fn pure_relevance_keeps_similarity_order() {
        let query = [1.0, 0.0];
        let vectors = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];
        let picked = mmr_select(&candidates(&query, &vectors), 3, 1.0);
        assert_eq!(picked, vec![0, 1, 2]);
    }

    #[test]
    fn diversity_skips_near_duplicates() {
        let query = [1.0, 0.2];
        let vectors = vec![vec![1.0, 0.2], vec![1.0, 0.2], vec![0.2, 1.0]];
        let picked = mmr_select(&candidates(&query, &vectors), 2, 0.5);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn ties_prefer_earlier_candidates() {
        let query = [1.0, 0.0];
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let picked = mmr_select(&candidates(&query, &vectors), 3, 0.5);
        assert_eq!(picked, vec![0, 1, 2]);
    }

    #[test]
    fn k_larger_than_candidates_returns_all() {
        let query = [1.0, 0.0];
        let vectors = vec![vec![1.0, 0.0]];
        assert_eq!(mmr_select(&candidates(&query, &vectors), 5, 0.5), vec![0]);
        assert!(mmr_select(&[], 5, 0.5).is_empty());
    }
}
