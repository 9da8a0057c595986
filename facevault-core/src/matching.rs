//! Verification (1:1) and identification (1:N) against the store.
//!
//! All distances are Euclidean, computed in `f64`. Identification keeps only
//! candidates strictly closer than the threshold and orders them by
//! `(distance, identity_id)` so equal distances rank deterministically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::euclidean_distance;
use crate::error::{Error, Result};
use crate::storage::EmbeddingStore;
use crate::vector::{Embedding, IdentityId};

/// One identity within the threshold of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// The matched identity.
    pub identity_id: IdentityId,
    /// Euclidean distance from the probe (lower = more similar).
    pub distance: f64,
}

impl MatchCandidate {
    /// Creates a new candidate.
    pub fn new(identity_id: IdentityId, distance: f64) -> Self {
        Self {
            identity_id,
            distance,
        }
    }
}

impl Eq for MatchCandidate {}

impl PartialOrd for MatchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.identity_id.cmp(&other.identity_id))
    }
}

/// Returns true if `distance` counts as a match under `threshold`.
///
/// Uses the same strict comparison as identification.
#[inline]
pub fn within_threshold(distance: f64, threshold: f64) -> bool {
    distance < threshold
}

/// Produces every candidate strictly within a threshold of a probe.
///
/// Implementations may use any access structure, but must return exactly the
/// identities an exhaustive scan would, in ascending `(distance, identity_id)`
/// order.
pub trait NeighborSearch {
    /// Finds all candidates with `distance < threshold`, at most `limit` of
    /// them when a limit is given.
    fn search(
        &self,
        probe: &[f32],
        threshold: f64,
        limit: Option<usize>,
    ) -> Result<Vec<MatchCandidate>>;
}

/// Exhaustive search over [`EmbeddingStore::scan`].
///
/// O(population × dimension). A single unreadable record fails the whole
/// search; records are never skipped.
pub struct ExactScan<S: ?Sized> {
    store: Arc<S>,
}

impl<S: EmbeddingStore + ?Sized> ExactScan<S> {
    /// Creates a scanner over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: EmbeddingStore + ?Sized> NeighborSearch for ExactScan<S> {
    fn search(
        &self,
        probe: &[f32],
        threshold: f64,
        limit: Option<usize>,
    ) -> Result<Vec<MatchCandidate>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        // Max-heap on (distance, id): the worst kept candidate sits on top.
        let mut heap = BinaryHeap::new();
        let mut scanned = 0usize;

        for item in self.store.scan()? {
            let (id, embedding) = item?;
            scanned += 1;

            let distance = euclidean_distance(probe, embedding.as_slice());
            if !within_threshold(distance, threshold) {
                continue;
            }

            let candidate = MatchCandidate::new(id, distance);
            match limit {
                Some(k) if heap.len() >= k => {
                    if let Some(worst) = heap.peek() {
                        if candidate < *worst {
                            heap.pop();
                            heap.push(candidate);
                        }
                    }
                }
                _ => heap.push(candidate),
            }
        }

        let results = heap.into_sorted_vec();
        tracing::debug!(scanned, matched = results.len(), threshold, "identify scan");
        Ok(results)
    }
}

/// Answers verification and identification queries.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use facevault_core::{Embedding, EmbeddingStore, Matcher, MemoryStore, StoreConfig};
///
/// let store = Arc::new(MemoryStore::new(StoreConfig::new(3)));
/// store.upsert(1, Embedding::new(&[1.0, 0.0, 0.0])).unwrap();
/// store.upsert(2, Embedding::new(&[0.0, 1.0, 0.0])).unwrap();
///
/// let matcher = Matcher::new(Arc::clone(&store));
/// let results = matcher.identify(&Embedding::new(&[1.0, 0.0, 0.0]), 0.1).unwrap();
/// assert_eq!(results.len(), 1);
/// assert_eq!(results[0].identity_id, 1);
/// ```
pub struct Matcher<S: ?Sized> {
    store: Arc<S>,
    search: Box<dyn NeighborSearch + Send + Sync>,
}

impl<S: EmbeddingStore + ?Sized + 'static> Matcher<S> {
    /// Creates a matcher that identifies by exhaustive scan.
    pub fn new(store: Arc<S>) -> Self {
        let search = Box::new(ExactScan::new(Arc::clone(&store)));
        Self { store, search }
    }
}

impl<S: EmbeddingStore + ?Sized> Matcher<S> {
    /// Creates a matcher that identifies through a custom search structure.
    pub fn with_search(store: Arc<S>, search: Box<dyn NeighborSearch + Send + Sync>) -> Self {
        Self { store, search }
    }

    /// Returns the Euclidean distance between `probe` and the canonical
    /// embedding of `id`.
    ///
    /// Applies no threshold; see [`within_threshold`].
    pub fn verify(&self, probe: &Embedding, id: IdentityId) -> Result<f64> {
        probe.validate(self.store.dimension())?;
        let canonical = self.store.get(id)?;
        let distance = euclidean_distance(probe.as_slice(), canonical.as_slice());
        tracing::debug!(identity = id, distance, "verified probe");
        Ok(distance)
    }

    /// Returns every identity with distance strictly below `threshold`,
    /// nearest first, ties broken by ascending identity id.
    ///
    /// An empty result means no match; it is not an error.
    pub fn identify(&self, probe: &Embedding, threshold: f64) -> Result<Vec<MatchCandidate>> {
        self.check_query(probe, threshold)?;
        self.search.search(probe.as_slice(), threshold, None)
    }

    /// Like [`identify`](Self::identify), keeping only the `limit` best
    /// candidates.
    pub fn identify_top(
        &self,
        probe: &Embedding,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<MatchCandidate>> {
        self.check_query(probe, threshold)?;
        self.search.search(probe.as_slice(), threshold, Some(limit))
    }

    fn check_query(&self, probe: &Embedding, threshold: f64) -> Result<()> {
        probe.validate(self.store.dimension())?;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(Error::InvalidThreshold(threshold));
        }
        Ok(())
    }
}
