//! Adapter between image bytes and embeddings.
//!
//! The face model itself is external. This module owns the policy around it:
//! picking a single face, validating and normalizing the model output, and
//! sharing a bounded set of model instances between concurrent requests.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::distance::l2_normalize;
use crate::error::{Error, Result};
use crate::vector::{validate, Embedding};

/// Axis-aligned face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A face found by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// A face detection and embedding model.
///
/// Instances are used by one request at a time, so implementations need not
/// be thread-safe; wrap them in a [`ModelPool`] to share them.
pub trait FaceModel: Send {
    /// Finds faces in an encoded image.
    fn detect(&mut self, image: &[u8]) -> Result<Vec<FaceDetection>>;

    /// Computes the raw embedding of one detected face.
    fn extract(&mut self, image: &[u8], face: &FaceDetection) -> Result<Vec<f32>>;
}

/// Maps an image to a unit-normalized embedding.
pub trait Embedder: Send + Sync {
    /// Dimensionality of produced embeddings.
    fn dimension(&self) -> usize;

    /// Embeds the dominant face in `image`.
    ///
    /// Fails with [`Error::NoFaceDetected`] or
    /// [`Error::MultipleFacesAmbiguous`] when no single face can be chosen.
    fn embed(&self, image: &[u8]) -> Result<Embedding>;
}

/// Picks the face with the highest detection confidence.
///
/// Several faces sharing the top confidence cannot be told apart and are
/// rejected rather than picked arbitrarily.
pub fn select_dominant_face(detections: &[FaceDetection]) -> Result<&FaceDetection> {
    let best = detections
        .iter()
        .filter(|d| !d.confidence.is_nan())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .ok_or(Error::NoFaceDetected)?;

    let tied = detections
        .iter()
        .filter(|d| d.confidence == best.confidence)
        .count();
    if tied > 1 {
        return Err(Error::MultipleFacesAmbiguous(tied));
    }
    Ok(best)
}

/// Configuration for a [`ModelPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Dimensionality the model emits.
    pub dimension: usize,
    /// Upper bound on waiting for a free model. `None` waits indefinitely.
    pub checkout_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Creates a config for the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            checkout_timeout: None,
        }
    }

    /// Sets the checkout timeout. Chainable.
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = Some(timeout);
        self
    }
}

/// A bounded set of model instances shared by concurrent requests.
///
/// Each [`embed`](Embedder::embed) call holds one model for its whole
/// duration. At most `size()` images are processed at once; further callers
/// wait up to the checkout timeout. A model whose call panics is retired;
/// once every model is retired, checkouts fail with [`Error::Model`].
///
/// # Example
///
/// ```ignore
/// let models = (0..4).map(|_| OnnxFaceModel::load("facenet.onnx")).collect::<Result<Vec<_>>>()?;
/// let pool = ModelPool::new(models, PoolConfig::new(128).with_checkout_timeout(Duration::from_secs(2)))?;
/// let embedding = pool.embed(&image_bytes)?;
/// ```
pub struct ModelPool<M> {
    config: PoolConfig,
    state: Mutex<PoolState<M>>,
    available: Condvar,
    size: usize,
}

struct PoolState<M> {
    idle: Vec<M>,
    /// Models not retired, idle or checked out.
    live: usize,
}

/// Retires the checked-out model unless the call completed.
struct Retire<'a, M> {
    pool: &'a ModelPool<M>,
    completed: bool,
}

impl<M> Drop for Retire<'_, M> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let live = {
            let mut state = self.pool.state.lock();
            state.live -= 1;
            state.live
        };
        tracing::error!(live, pool_size = self.pool.size, "face model panicked, retired");
        self.pool.available.notify_all();
    }
}

impl<M: FaceModel> ModelPool<M> {
    /// Creates a pool owning `models`.
    pub fn new(models: Vec<M>, config: PoolConfig) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config("model pool needs at least one model".into()));
        }
        let size = models.len();
        Ok(Self {
            config,
            state: Mutex::new(PoolState {
                idle: models,
                live: size,
            }),
            available: Condvar::new(),
            size,
        })
    }

    /// Number of model instances owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of models not currently checked out.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of models not retired after a panic.
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Runs `f` with exclusive use of one model.
    ///
    /// Waits for a free model up to the configured checkout timeout. A model
    /// whose call panics is retired instead of returned to the pool.
    pub fn with_model<T>(&self, f: impl FnOnce(&mut M) -> T) -> Result<T> {
        let mut model = self.acquire()?;
        let mut retire = Retire {
            pool: self,
            completed: false,
        };
        let out = f(&mut model);
        retire.completed = true;
        self.give_back(model);
        Ok(out)
    }

    fn acquire(&self) -> Result<M> {
        let timeout = self.config.checkout_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if let Some(model) = state.idle.pop() {
                return Ok(model);
            }
            if state.live == 0 {
                return Err(Error::Model("every pooled model has been retired".into()));
            }

            match (deadline, timeout) {
                (Some(deadline), Some(after)) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                    {
                        tracing::warn!(pool_size = self.size, ?after, "model checkout timed out");
                        return Err(Error::Timeout {
                            operation: "model checkout",
                            after,
                        });
                    }
                }
                _ => self.available.wait(&mut state),
            }
        }
    }

    fn give_back(&self, model: M) {
        self.state.lock().idle.push(model);
        self.available.notify_one();
    }
}

impl<M: FaceModel> Embedder for ModelPool<M> {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn embed(&self, image: &[u8]) -> Result<Embedding> {
        let raw = self.with_model(|model| -> Result<Vec<f32>> {
            let detections = model.detect(image)?;
            let face = *select_dominant_face(&detections)?;
            tracing::debug!(
                faces = detections.len(),
                confidence = face.confidence,
                "selected face"
            );
            model.extract(image, &face)
        })??;

        validate(&raw, self.config.dimension)?;
        Ok(Embedding::from_vec(l2_normalize(&raw)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ByteModel;
    use super::*;
    use std::sync::Arc;

    fn detection(confidence: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x: 10,
                y: 20,
                width: 50,
                height: 60,
            },
            confidence,
        }
    }

    #[test]
    fn test_select_highest_confidence() {
        let detections = [detection(0.7), detection(0.95), detection(0.4)];
        let face = select_dominant_face(&detections).unwrap();
        assert_eq!(face.confidence, 0.95);
    }

    #[test]
    fn test_select_no_face() {
        assert!(matches!(
            select_dominant_face(&[]),
            Err(Error::NoFaceDetected)
        ));
    }

    #[test]
    fn test_select_tied_faces() {
        let detections = [detection(0.9), detection(0.9), detection(0.1)];
        assert!(matches!(
            select_dominant_face(&detections),
            Err(Error::MultipleFacesAmbiguous(2))
        ));
    }

    #[test]
    fn test_embed_normalizes() {
        let pool = ModelPool::new(vec![ByteModel], PoolConfig::new(2)).unwrap();
        let e = pool.embed(&[3, 4]).unwrap();
        assert!((e[0] - 0.6).abs() < 1e-6);
        assert!((e[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_embed_rejections() {
        let pool = ModelPool::new(vec![ByteModel], PoolConfig::new(2)).unwrap();
        assert!(matches!(pool.embed(&[]), Err(Error::NoFaceDetected)));
        assert!(matches!(
            pool.embed(&[0xFF, 1]),
            Err(Error::MultipleFacesAmbiguous(2))
        ));
        assert!(matches!(
            pool.embed(&[1, 2, 3]),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
        // Failed requests still return the model.
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = ModelPool::<ByteModel>::new(Vec::new(), PoolConfig::new(2));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_checkout_times_out_when_exhausted() {
        let pool = ModelPool::new(
            vec![ByteModel],
            PoolConfig::new(2).with_checkout_timeout(Duration::from_millis(20)),
        )
        .unwrap();

        // The only model is busy while the outer call runs.
        let nested = pool.with_model(|_| pool.embed(&[1, 1])).unwrap();
        assert!(matches!(
            nested,
            Err(Error::Timeout {
                operation: "model checkout",
                ..
            })
        ));
        assert!(pool.embed(&[1, 1]).is_ok());
    }

    struct PanickingModel;

    impl FaceModel for PanickingModel {
        fn detect(&mut self, _image: &[u8]) -> Result<Vec<FaceDetection>> {
            panic!("detector crashed");
        }

        fn extract(&mut self, _image: &[u8], _face: &FaceDetection) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panicking_model_is_retired() {
        let pool = Arc::new(ModelPool::new(vec![PanickingModel], PoolConfig::new(2)).unwrap());

        // A waiter with no timeout must be released, not left blocked.
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                pool.with_model(|_| ()).map(|_| ())
            })
        };

        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pool.embed(&[1, 1])));
        assert!(crashed.is_err());
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        assert!(matches!(pool.embed(&[1, 1]), Err(Error::Model(_))));
        assert!(matches!(waiter.join().unwrap(), Err(Error::Model(_))));
    }

    #[test]
    fn test_pool_bounds_concurrency() {
        let pool = Arc::new(ModelPool::new(vec![ByteModel, ByteModel], PoolConfig::new(2)).unwrap());

        std::thread::scope(|s| {
            for i in 1..=8u8 {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    let e = pool.embed(&[i, i]).unwrap();
                    assert!((e.norm() - 1.0).abs() < 1e-6);
                });
            }
        });

        assert_eq!(pool.idle_count(), 2);
    }
}
