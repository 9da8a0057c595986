//! Enrollment: many sample embeddings in, one canonical embedding stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance;
use crate::error::{Error, Result};
use crate::storage::EmbeddingStore;
use crate::vector::{Embedding, IdentityId};

/// How the canonical embedding is derived from the sample mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationPolicy {
    /// Project the mean back onto the unit sphere, so canonical embeddings
    /// live in the same space as probes.
    #[default]
    Renormalize,
    /// Store the raw arithmetic mean. Its norm shrinks as samples disagree.
    MeanOnly,
}

/// Combines a batch of sample embeddings into an identity's canonical vector
/// and writes it to the store.
///
/// Each call is a full replacement: enrolling an identity again discards
/// whatever the previous batch produced. Callers wanting to "add photos"
/// must resubmit the whole set.
pub struct EnrollmentAggregator<S: ?Sized> {
    store: Arc<S>,
    policy: AggregationPolicy,
}

impl<S: EmbeddingStore + ?Sized> EnrollmentAggregator<S> {
    /// Creates an aggregator writing into `store`.
    pub fn new(store: Arc<S>, policy: AggregationPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns the aggregation policy.
    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Computes the canonical embedding without storing it.
    pub fn aggregate(&self, samples: &[Embedding]) -> Result<Embedding> {
        if samples.is_empty() {
            return Err(Error::EmptyEnrollment);
        }

        let dimension = self.store.dimension();
        for sample in samples {
            sample.validate(dimension)?;
        }

        let mean = distance::mean(samples.iter().map(Embedding::as_slice))
            .ok_or(Error::EmptyEnrollment)?;
        let mean = Embedding::from_vec(mean);

        match self.policy {
            AggregationPolicy::MeanOnly => Ok(mean),
            AggregationPolicy::Renormalize => mean.normalized().ok_or(Error::ZeroNorm),
        }
    }

    /// Replaces the canonical embedding of `id` with the aggregate of `samples`.
    ///
    /// Performs exactly one store write. On any error the stored record for
    /// `id` is left as it was.
    pub fn enroll(&self, id: IdentityId, samples: &[Embedding]) -> Result<()> {
        let canonical = self.aggregate(samples)?;
        self.store.upsert(id, canonical)?;

        tracing::info!(
            identity = id,
            samples = samples.len(),
            policy = ?self.policy,
            "enrolled identity"
        );
        Ok(())
    }
}
