//! # FaceVault Core
//!
//! Core library for FaceVault, the matching and storage core of a face
//! recognition service.
//!
//! Callers enroll identities from sample embeddings (or images, through an
//! [`Embedder`]), then verify a probe against one identity or identify it
//! against everyone enrolled. Distances are Euclidean; lower is more similar.
//! Thresholds always come from the caller.
//!
//! ## Crate Features
//!
//! - `async` - Enables [`AsyncEngine`] for tokio-compatible async operations
//!
//! ## Core Types
//!
//! ### Entry points
//!
//! - [`FaceEngine`] - Enroll, verify and identify over images
//! - [`AsyncEngine`] - Async wrapper for tokio compatibility (requires `async` feature)
//!
//! ### Enrollment and matching
//!
//! - [`EnrollmentAggregator`] - Mean of samples, optionally renormalized, stored as one record
//! - [`Matcher`] - 1:1 verification and threshold-bounded 1:N identification
//! - [`NeighborSearch`] - Seam for substituting an index for the exhaustive scan
//!
//! ### Persistence
//!
//! - [`EmbeddingStore`] - Keyed, durable store of canonical embeddings
//! - [`FileStore`] - CRC-framed append-only record log on disk
//! - [`MemoryStore`] - In-memory store for tests and ephemeral use
//!
//! ### Models
//!
//! - [`FaceModel`] - Detection and embedding model interface
//! - [`ModelPool`] - Bounded set of models shared across requests
//!
//! ### Types
//!
//! - [`Embedding`] - Owned embedding vector
//! - [`IdentityId`] - Opaque identity identifier (u64)
//! - [`MatchCandidate`] - Identity and its distance from a probe

pub mod distance;
pub mod embedder;
pub mod engine;
pub mod enroll;
pub mod error;
pub mod matching;
pub mod storage;
pub mod vector;

// Re-exports for convenient access
pub use embedder::{
    select_dominant_face, BoundingBox, Embedder, FaceDetection, FaceModel, ModelPool, PoolConfig,
};
#[cfg(feature = "async")]
pub use engine::AsyncEngine;
pub use engine::{EngineConfig, FaceEngine};
pub use enroll::{AggregationPolicy, EnrollmentAggregator};
pub use error::{Error, ErrorKind, Result};
pub use matching::{within_threshold, ExactScan, MatchCandidate, Matcher, NeighborSearch};
pub use storage::{
    EmbeddingStore, FileStore, IdentityRecord, MemoryStore, StoreConfig, SyncMode,
};
pub use vector::{Embedding, IdentityId};

/// Re-export commonly used types for convenience.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use facevault_core::prelude::*;
///
/// let store = Arc::new(MemoryStore::new(StoreConfig::new(2)));
/// let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::Renormalize);
/// enroller.enroll(1, &[Embedding::new(&[1.0, 0.1]), Embedding::new(&[1.0, -0.1])]).unwrap();
///
/// let matcher = Matcher::new(store);
/// let results = matcher.identify(&Embedding::new(&[1.0, 0.0]), 0.5).unwrap();
/// assert_eq!(results[0].identity_id, 1);
/// ```
pub mod prelude {
    pub use crate::{
        AggregationPolicy, Embedder, Embedding, EmbeddingStore, EngineConfig,
        EnrollmentAggregator, Error, FaceEngine, FaceModel, FileStore, IdentityId,
        MatchCandidate, Matcher, MemoryStore, ModelPool, PoolConfig, Result, StoreConfig,
    };
}
