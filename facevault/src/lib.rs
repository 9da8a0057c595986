//! # FaceVault
//!
//! **Embedded face enrollment, verification and identification.**
//!
//! FaceVault is the matching core of a face recognition service. It turns
//! images into unit-length embeddings, stores one canonical embedding per
//! identity, and answers two questions about a probe face:
//!
//! - **Verification (1:1)** — how far is this face from identity `X`?
//! - **Identification (1:N)** — which enrolled identities are within a threshold, nearest first?
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Enrollment** | Mean of several samples, renormalized, replacing any prior enrollment |
//! | **Deterministic ranking** | Ties on distance broken by ascending identity id |
//! | **Persistence** | CRC-framed append-only log with torn-tail recovery |
//! | **Bounded waits** | Store locks and model checkout fail with `Timeout` instead of blocking |
//! | **Async API** | Tokio-compatible async operations (feature flag) |
//!
//! ## Quick Start
//!
//! ### Matching Embeddings
//!
//! When embeddings come from elsewhere:
//!
//! ```rust
//! use std::sync::Arc;
//! use facevault::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new(StoreConfig::new(3)));
//! let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::Renormalize);
//!
//! enroller.enroll(1, &[Embedding::new(&[1.0, 0.0, 0.0])]).unwrap();
//! enroller.enroll(2, &[Embedding::new(&[0.0, 1.0, 0.0])]).unwrap();
//!
//! let matcher = Matcher::new(store);
//! let probe = Embedding::new(&[0.7, 0.7, 0.0]);
//!
//! // Equal distances: identity 1 ranks before identity 2.
//! let results = matcher.identify(&probe, 1.0).unwrap();
//! assert_eq!(results.len(), 2);
//! assert_eq!(results[0].identity_id, 1);
//!
//! // Nothing within the threshold is an empty result, not an error.
//! assert!(matcher.identify(&probe, 0.1).unwrap().is_empty());
//! ```
//!
//! ### Persistent Engine
//!
//! With a face model and on-disk storage:
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use facevault::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let config = StoreConfig::new(128).with_lock_timeout(Duration::from_secs(1));
//!     let store = Arc::new(FileStore::open_or_create("./identities", config)?);
//!
//!     // `MyModel` implements `FaceModel`.
//!     let models = vec![MyModel::load()?, MyModel::load()?];
//!     let pool = ModelPool::new(models, PoolConfig::new(128))?;
//!
//!     let engine = FaceEngine::new(store, pool, EngineConfig::new())?;
//!     engine.enroll(42, &[front_jpeg, profile_jpeg])?;
//!
//!     let distance = engine.verify(&probe_jpeg, 42)?;
//!     let matches = engine.identify(&probe_jpeg, 0.55)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Crate Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | Enables `AsyncEngine` for tokio compatibility |
//!
//! Enable features in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! facevault = { version = "0.1", features = ["async"] }
//! ```
//!
//! ## Architecture
//!
//! FaceVault is organized into two crates:
//!
//! - **`facevault-core`** — Core library with no async runtime dependency
//! - **`facevault`** — Main crate that re-exports everything
//!
//! ### Core Components
//!
//! - [`FaceEngine`] — Image-level enroll, verify and identify
//! - [`EnrollmentAggregator`] — Sample batch to canonical embedding
//! - [`Matcher`] — Verification and identification over a store
//! - [`FileStore`] — Durable storage with crash recovery
//! - [`MemoryStore`] — In-memory storage
//! - [`ModelPool`] — Bounded sharing of face models
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`](crate::Result), which uses
//! the [`Error`] enum for error types. [`Error::kind`] groups them for
//! boundary code, and [`Error::is_retryable`] flags IO and timeout failures.
//!
//! ## Thread Safety
//!
//! - Stores use internal `RwLock`s; a write to one identity is never observed half-done
//! - [`FaceEngine`] is `Send + Sync` and meant to be shared behind an `Arc`
//! - [`ModelPool`] hands each model to one request at a time

// Re-export everything from core
pub use facevault_core::*;
