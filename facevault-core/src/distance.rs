//! Vector math shared by enrollment and matching.
//!
//! Components are `f32` on the way in; every reduction accumulates in `f64`
//! so repeated means and near-tie distances do not drift with dimension.

/// Floor applied to the squared norm before normalizing, so near-zero model
/// output does not divide by zero.
pub const NORM_EPSILON: f64 = 1e-10;

/// Computes Euclidean (L2) distance between two vectors.
///
/// Formula: sqrt(sum((a[i] - b[i])^2))
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Computes squared Euclidean distance (avoids sqrt for comparisons).
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let diff = x as f64 - y as f64;
            diff * diff
        })
        .sum()
}

/// Computes the L2 norm of a vector.
#[inline]
pub fn l2_norm(a: &[f32]) -> f64 {
    a.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// Scales `a` to unit length, clamping the squared norm at [`NORM_EPSILON`].
pub fn l2_normalize(a: &[f32]) -> Vec<f32> {
    let squared: f64 = a.iter().map(|&x| (x as f64) * (x as f64)).sum();
    let norm = squared.max(NORM_EPSILON).sqrt();
    a.iter().map(|&x| (x as f64 / norm) as f32).collect()
}

/// Computes the component-wise arithmetic mean of equally sized vectors.
///
/// Returns None for an empty input.
pub fn mean<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sums: Vec<f64> = first.iter().map(|&x| x as f64).collect();
    let mut count = 1usize;

    for v in iter {
        debug_assert_eq!(v.len(), sums.len(), "Vector dimensions must match");
        for (acc, &x) in sums.iter_mut().zip(v.iter()) {
            *acc += x as f64;
        }
        count += 1;
    }

    let n = count as f64;
    Some(sums.into_iter().map(|s| (s / n) as f32).collect())
}
