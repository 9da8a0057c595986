//! Error types for FaceVault operations.

use std::time::Duration;

use thiserror::Error;

use crate::vector::IdentityId;

/// Result type alias using FaceVault's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during enrollment, matching or storage.
#[derive(Debug, Error)]
pub enum Error {
    /// Vector dimension does not match the configured embedding space.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A vector component is NaN or infinite.
    #[error("non-finite component at index {index}")]
    NonFiniteComponent { index: usize },

    /// A vector with zero L2 norm cannot be projected onto the unit sphere.
    #[error("vector has zero norm")]
    ZeroNorm,

    /// Identification threshold is negative or NaN.
    #[error("invalid threshold: {0}")]
    InvalidThreshold(f64),

    /// Enrollment was called without any sample embeddings.
    #[error("enrollment requires at least one sample")]
    EmptyEnrollment,

    /// No record exists for the identity.
    #[error("identity not found: {0}")]
    NotFound(IdentityId),

    /// IO error during storage operations.
    #[error("io error: {0}")]
    IoError(String),

    /// A stored record failed its checksum or could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A bounded wait was exceeded.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The embedder found no face in the image.
    #[error("no face detected")]
    NoFaceDetected,

    /// Several faces share the highest detection confidence.
    #[error("{0} faces tie for highest detection confidence")]
    MultipleFacesAmbiguous(usize),

    /// The underlying embedding model failed.
    #[error("model error: {0}")]
    Model(String),

    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Background(String),
}

/// Coarse classification of [`Error`] values for boundary code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed vector: wrong dimension, non-finite or zero norm.
    InvalidVector,
    /// Threshold outside `[0, +inf)`.
    InvalidThreshold,
    /// No samples supplied to enrollment.
    EmptyEnrollment,
    /// Unknown identity on point lookup.
    NotFound,
    /// IO or corruption in the backing store.
    Storage,
    /// Bounded wait exceeded.
    Timeout,
    /// The embedder rejected the image.
    Rejected,
    /// Model, configuration or task failure.
    Internal,
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DimensionMismatch { .. } | Error::NonFiniteComponent { .. } | Error::ZeroNorm => {
                ErrorKind::InvalidVector
            }
            Error::InvalidThreshold(_) => ErrorKind::InvalidThreshold,
            Error::EmptyEnrollment => ErrorKind::EmptyEnrollment,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::IoError(_) | Error::Corrupted(_) => ErrorKind::Storage,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::NoFaceDetected | Error::MultipleFacesAmbiguous(_) => ErrorKind::Rejected,
            Error::Model(_) | Error::Config(_) | Error::Background(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may safely retry the operation.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Timeout)
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        Error::IoError(format!("{}: {}", context, err))
    }
}
