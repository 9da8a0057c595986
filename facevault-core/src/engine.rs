//! The three entry points offered to a serving boundary.
//!
//! A `FaceEngine` ties an [`Embedder`] to enrollment and matching over one
//! shared [`EmbeddingStore`]. It is transport-free: HTTP, CLI or RPC layers
//! call it and map its errors to their own responses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::euclidean_distance;
use crate::embedder::Embedder;
use crate::enroll::{AggregationPolicy, EnrollmentAggregator};
use crate::error::{Error, Result};
use crate::matching::{MatchCandidate, Matcher, NeighborSearch};
use crate::storage::EmbeddingStore;
use crate::vector::{Embedding, IdentityId};

/// Configuration for a [`FaceEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How enrollment turns samples into a canonical embedding.
    pub aggregation: AggregationPolicy,
}

impl EngineConfig {
    /// Creates the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the aggregation policy. Chainable.
    pub fn with_aggregation(mut self, policy: AggregationPolicy) -> Self {
        self.aggregation = policy;
        self
    }
}

/// Enrollment, verification and identification over images.
///
/// Thresholds are always supplied by the caller; the engine has none built in.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(FileStore::open_or_create("./identities", StoreConfig::new(128))?);
/// let engine = FaceEngine::new(store, pool, EngineConfig::new())?;
///
/// engine.enroll(42, &[front_jpeg, profile_jpeg])?;
/// let distance = engine.verify(&probe_jpeg, 42)?;
/// let ranked = engine.identify(&probe_jpeg, 0.55)?;
/// ```
pub struct FaceEngine<S: ?Sized, E> {
    store: Arc<S>,
    embedder: E,
    aggregator: EnrollmentAggregator<S>,
    matcher: Matcher<S>,
}

impl<S, E> FaceEngine<S, E>
where
    S: EmbeddingStore + ?Sized + 'static,
    E: Embedder,
{
    /// Creates an engine identifying by exhaustive scan.
    pub fn new(store: Arc<S>, embedder: E, config: EngineConfig) -> Result<Self> {
        let matcher = Matcher::new(Arc::clone(&store));
        Self::build(store, embedder, config, matcher)
    }

    /// Creates an engine identifying through a custom search structure.
    pub fn with_search(
        store: Arc<S>,
        embedder: E,
        config: EngineConfig,
        search: Box<dyn NeighborSearch + Send + Sync>,
    ) -> Result<Self> {
        let matcher = Matcher::with_search(Arc::clone(&store), search);
        Self::build(store, embedder, config, matcher)
    }

    fn build(store: Arc<S>, embedder: E, config: EngineConfig, matcher: Matcher<S>) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(Error::Config(format!(
                "embedder produces dimension {}, store holds {}",
                embedder.dimension(),
                store.dimension()
            )));
        }

        let aggregator = EnrollmentAggregator::new(Arc::clone(&store), config.aggregation);
        Ok(Self {
            store,
            embedder,
            aggregator,
            matcher,
        })
    }

    /// Enrolls `id` from a batch of images, replacing any previous enrollment.
    ///
    /// Every image must yield a face; the first rejection fails the whole
    /// call and nothing is stored.
    pub fn enroll<I: AsRef<[u8]>>(&self, id: IdentityId, images: &[I]) -> Result<()> {
        if images.is_empty() {
            return Err(Error::EmptyEnrollment);
        }

        let samples = images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                self.embedder.embed(image.as_ref()).inspect_err(|e| {
                    tracing::info!(identity = id, image = i, error = %e, "enrollment image rejected");
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.enroll_embeddings(id, &samples)
    }

    /// Enrolls several identities, each from its own batch of images.
    ///
    /// Identities are enrolled one after another and independently: a failed
    /// identity does not stop the rest, and successful ones stay enrolled.
    /// Returns one result per identity, in input order.
    pub fn enroll_many<I, B>(&self, batches: I) -> Vec<(IdentityId, Result<()>)>
    where
        I: IntoIterator<Item = (IdentityId, Vec<B>)>,
        B: AsRef<[u8]>,
    {
        let results: Vec<_> = batches
            .into_iter()
            .map(|(id, images)| (id, self.enroll(id, &images)))
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::info!(
            identities = results.len(),
            failed,
            "bulk enrollment finished"
        );
        results
    }

    /// Returns the distance between the faces in two images.
    ///
    /// Nothing is read from or written to the store.
    pub fn compare(&self, image_a: &[u8], image_b: &[u8]) -> Result<f64> {
        let a = self.embedder.embed(image_a)?;
        let b = self.embedder.embed(image_b)?;
        Ok(euclidean_distance(a.as_slice(), b.as_slice()))
    }

    /// Returns the distance between the face in `probe_image` and `id`.
    pub fn verify(&self, probe_image: &[u8], id: IdentityId) -> Result<f64> {
        let probe = self.embedder.embed(probe_image)?;
        self.verify_embedding(&probe, id)
    }

    /// Ranks every identity strictly within `threshold` of the face in
    /// `probe_image`.
    pub fn identify(&self, probe_image: &[u8], threshold: f64) -> Result<Vec<MatchCandidate>> {
        let probe = self.embedder.embed(probe_image)?;
        self.identify_embedding(&probe, threshold)
    }

    /// Like [`identify`](Self::identify), keeping only the `limit` best.
    pub fn identify_top(
        &self,
        probe_image: &[u8],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<MatchCandidate>> {
        let probe = self.embedder.embed(probe_image)?;
        self.matcher.identify_top(&probe, threshold, limit)
    }

    /// Enrolls `id` from already computed embeddings.
    pub fn enroll_embeddings(&self, id: IdentityId, samples: &[Embedding]) -> Result<()> {
        self.aggregator.enroll(id, samples)
    }

    /// Verifies an already computed probe embedding.
    pub fn verify_embedding(&self, probe: &Embedding, id: IdentityId) -> Result<f64> {
        self.matcher.verify(probe, id)
    }

    /// Identifies an already computed probe embedding.
    pub fn identify_embedding(
        &self,
        probe: &Embedding,
        threshold: f64,
    ) -> Result<Vec<MatchCandidate>> {
        self.matcher.identify(probe, threshold)
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the embedder.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }
}

// Async API when tokio feature is enabled
#[cfg(feature = "async")]
mod async_api {
    use super::*;
    use std::time::Duration;

    /// Async wrapper for [`FaceEngine`].
    ///
    /// Runs each call on the blocking thread pool via `spawn_blocking`. With a
    /// deadline set, a call that outlives it resolves to [`Error::Timeout`];
    /// the blocking work is not interrupted, and an in-flight store write
    /// still lands whole or not at all.
    pub struct AsyncEngine<S: ?Sized, E> {
        inner: Arc<FaceEngine<S, E>>,
        deadline: Option<Duration>,
    }

    impl<S: ?Sized, E> Clone for AsyncEngine<S, E> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
                deadline: self.deadline,
            }
        }
    }

    impl<S, E> AsyncEngine<S, E>
    where
        S: EmbeddingStore + ?Sized + 'static,
        E: Embedder + 'static,
    {
        /// Wraps an engine with no deadline.
        pub fn from_sync(engine: FaceEngine<S, E>) -> Self {
            Self {
                inner: Arc::new(engine),
                deadline: None,
            }
        }

        /// Bounds every call by `deadline`. Chainable.
        pub fn with_deadline(mut self, deadline: Duration) -> Self {
            self.deadline = Some(deadline);
            self
        }

        async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&FaceEngine<S, E>) -> Result<T> + Send + 'static,
        {
            let inner = Arc::clone(&self.inner);
            let task = tokio::task::spawn_blocking(move || f(&inner));

            let joined = match self.deadline {
                None => task.await,
                Some(after) => tokio::time::timeout(after, task)
                    .await
                    .map_err(|_| Error::Timeout { operation, after })?,
            };
            joined.map_err(|e| Error::Background(e.to_string()))?
        }

        /// Enrolls `id` from a batch of images asynchronously.
        pub async fn enroll(&self, id: IdentityId, images: Vec<Vec<u8>>) -> Result<()> {
            self.run("enroll", move |engine| engine.enroll(id, &images))
                .await
        }

        /// Verifies a probe image asynchronously.
        pub async fn verify(&self, probe_image: Vec<u8>, id: IdentityId) -> Result<f64> {
            self.run("verify", move |engine| engine.verify(&probe_image, id))
                .await
        }

        /// Enrolls several identities asynchronously, one result per identity.
        pub async fn enroll_many(
            &self,
            batches: Vec<(IdentityId, Vec<Vec<u8>>)>,
        ) -> Result<Vec<(IdentityId, Result<()>)>> {
            self.run("enroll", move |engine| Ok(engine.enroll_many(batches)))
                .await
        }

        /// Compares two images asynchronously.
        pub async fn compare(&self, image_a: Vec<u8>, image_b: Vec<u8>) -> Result<f64> {
            self.run("compare", move |engine| engine.compare(&image_a, &image_b))
                .await
        }

        /// Identifies a probe image asynchronously.
        pub async fn identify(
            &self,
            probe_image: Vec<u8>,
            threshold: f64,
        ) -> Result<Vec<MatchCandidate>> {
            self.run("identify", move |engine| {
                engine.identify(&probe_image, threshold)
            })
            .await
        }

        /// Enrolls from embeddings asynchronously.
        pub async fn enroll_embeddings(&self, id: IdentityId, samples: Vec<Embedding>) -> Result<()> {
            self.run("enroll", move |engine| engine.enroll_embeddings(id, &samples))
                .await
        }

        /// Identifies a probe embedding asynchronously.
        pub async fn identify_embedding(
            &self,
            probe: Embedding,
            threshold: f64,
        ) -> Result<Vec<MatchCandidate>> {
            self.run("identify", move |engine| {
                engine.identify_embedding(&probe, threshold)
            })
            .await
        }

        /// Returns reference to inner sync engine.
        pub fn inner(&self) -> &FaceEngine<S, E> {
            &self.inner
        }
    }
}

#[cfg(feature = "async")]
pub use async_api::AsyncEngine;
