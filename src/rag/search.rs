use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::chunk::Chunk;
use super::index::VectorIndex;
use super::mmr::{mmr_rerank, MmrCandidate};
use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: usize,
    /// Cosine similarity to the query.
    pub score: f32,
    pub chunk: Chunk,
}

/// L2 normalize a vector in-place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Dot product similarity. On pre-normalized vectors, this equals cosine similarity.
pub fn dot_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Read-only nearest-neighbour access to an index. Implementations may be exact
/// or approximate; everything here is safe to call concurrently.
pub trait VectorStore: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of stored vectors, 0 for an empty store.
    fn dimensions(&self) -> usize;

    fn vector(&self, chunk_id: usize) -> Option<&[f32]>;

    /// The `k` most similar chunks, best first. Ties go to the lower chunk id.
    fn similarity_search(&self, query: &[f32], k: usize) -> RagResult<Vec<SearchResult>>;

    /// Maximal-marginal-relevance search over the `fetch_k` nearest candidates.
    /// `fetch_k` below `k` is raised to `k`.
    fn diversity_search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> RagResult<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let pool = self.similarity_search(query, fetch_k.max(k))?;
        let candidates: Vec<MmrCandidate<'_>> = pool
            .iter()
            .enumerate()
            .filter_map(|(rank, r)| {
                self.vector(r.chunk_id).map(|vector| MmrCandidate {
                    rank,
                    score: r.score,
                    vector,
                })
            })
            .collect();
        let picked = mmr_rerank(&candidates, k, lambda);
        let mut pool: Vec<Option<SearchResult>> = pool.into_iter().map(Some).collect();
        Ok(picked
            .into_iter()
            .filter_map(|rank| pool[rank].take())
            .collect())
    }
}

/// Min-heap entry for top-K selection.
#[derive(Debug)]
struct HeapEntry {
    score: f32,
    chunk_id: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (worst entry on top).
        // Among equal scores the higher chunk_id is worse.
        match other.score.partial_cmp(&self.score) {
            Some(Ordering::Equal) | None => self.chunk_id.cmp(&other.chunk_id),
            Some(ord) => ord,
        }
    }
}

impl VectorStore for VectorIndex {
    fn len(&self) -> usize {
        VectorIndex::len(self)
    }

    fn dimensions(&self) -> usize {
        self.dims()
    }

    fn vector(&self, chunk_id: usize) -> Option<&[f32]> {
        VectorIndex::vector(self, chunk_id)
    }

    fn similarity_search(&self, query: &[f32], k: usize) -> RagResult<Vec<SearchResult>> {
        let count = VectorIndex::len(self);
        if count == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims() {
            return Err(RagError::Validation(format!(
                "Query vector dimension mismatch: query has {}, index has {}",
                query.len(),
                self.dims()
            )));
        }

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k.min(count) + 1);
        for chunk_id in 0..count {
            let Some(v) = VectorIndex::vector(self, chunk_id) else { continue };
            let score = dot_similarity(query, v);
            if !score.is_finite() {
                continue;
            }
            heap.push(HeapEntry { score, chunk_id });
            if heap.len() > k {
                heap.pop();
            }
        }

        // into_sorted_vec is ascending by Ord, which is best-first here.
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .filter_map(|e| {
                self.chunk(e.chunk_id).map(|chunk| SearchResult {
                    chunk_id: e.chunk_id,
                    score: e.score,
                    chunk: chunk.clone(),
                })
            })
            .collect())
    }
}
