//! Embedding vector types and validation.

use serde::{Deserialize, Serialize};

use crate::distance;
use crate::error::{Error, Result};

/// Unique identifier for an enrolled identity.
pub type IdentityId = u64;

/// A dense face embedding.
///
/// Components are stored as `f32`, the precision most face models emit.
/// Arithmetic over embeddings (means, distances) accumulates in `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    data: Vec<f32>,
}

impl Embedding {
    /// Creates a new embedding from a slice of f32 values.
    ///
    /// # Example
    ///
    /// ```
    /// use facevault_core::Embedding;
    ///
    /// let e = Embedding::new(&[1.0, 0.0, 0.0]);
    /// assert_eq!(e.dimension(), 3);
    /// ```
    #[inline]
    pub fn new(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Creates an embedding from an owned `Vec<f32>`.
    #[inline]
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Returns the dimension (length) of the embedding.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Returns a slice view of the components.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns true if the embedding has zero components.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Computes the L2 norm.
    #[inline]
    pub fn norm(&self) -> f64 {
        distance::l2_norm(&self.data)
    }

    /// Returns a unit-length copy.
    ///
    /// Returns None if the embedding has zero norm.
    pub fn normalized(&self) -> Option<Self> {
        let norm = self.norm();
        if norm == 0.0 {
            None
        } else {
            Some(Self {
                data: self.data.iter().map(|&x| (x as f64 / norm) as f32).collect(),
            })
        }
    }

    /// Checks that the embedding has `dimension` finite components.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        validate(&self.data, dimension)
    }

    /// Consumes the embedding and returns the underlying data.
    #[inline]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }
}

/// Checks that `data` has exactly `dimension` finite components.
pub fn validate(data: &[f32], dimension: usize) -> Result<()> {
    if data.len() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            got: data.len(),
        });
    }
    if let Some(index) = data.iter().position(|x| !x.is_finite()) {
        return Err(Error::NonFiniteComponent { index });
    }
    Ok(())
}

impl From<Vec<f32>> for Embedding {
    fn from(data: Vec<f32>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[f32]> for Embedding {
    fn from(data: &[f32]) -> Self {
        Self::new(data)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.data
    }
}

impl std::ops::Index<usize> for Embedding {
    type Output = f32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}
