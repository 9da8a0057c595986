//! Async API demo using AsyncEngine.
//!
//! Run with: cargo run --example async_demo --features async

use facevault::prelude::*;
#[cfg(feature = "async")]
use facevault::AsyncEngine;

#[cfg(feature = "async")]
struct ToyModel;

#[cfg(feature = "async")]
impl FaceModel for ToyModel {
    fn detect(&mut self, image: &[u8]) -> Result<Vec<facevault::FaceDetection>> {
        let face = facevault::FaceDetection {
            bbox: facevault::BoundingBox {
                x: 0,
                y: 0,
                width: 112,
                height: 112,
            },
            confidence: 0.9,
        };
        Ok(if image.is_empty() { Vec::new() } else { vec![face] })
    }

    fn extract(&mut self, image: &[u8], _face: &facevault::FaceDetection) -> Result<Vec<f32>> {
        Ok(image.iter().map(|&b| b as f32 / 255.0).collect())
    }
}

#[cfg(feature = "async")]
#[tokio::main]
async fn main() -> Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use rand::Rng;

    tracing_subscriber::fmt::init();

    println!("Async FaceVault Demo\n");

    let temp_dir = std::env::temp_dir().join("facevault_async_demo");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let store = Arc::new(FileStore::open_or_create(&temp_dir, StoreConfig::new(16))?);
    let models = (0..4).map(|_| ToyModel).collect();
    let pool = ModelPool::new(
        models,
        PoolConfig::new(16).with_checkout_timeout(Duration::from_secs(2)),
    )?;
    let engine = AsyncEngine::from_sync(FaceEngine::new(store, pool, EngineConfig::new())?)
        .with_deadline(Duration::from_secs(5));

    println!("Enrolling 200 identities concurrently...");
    let start = std::time::Instant::now();

    let mut rng = rand::thread_rng();
    let faces: Vec<Vec<u8>> = (0..200)
        .map(|_| (0..16).map(|_| rng.gen_range(1..=255u8)).collect())
        .collect();

    let mut handles = vec![];
    for (i, face) in faces.iter().enumerate() {
        let engine = engine.clone();
        let photos = vec![face.clone(), face.clone()];
        handles.push(tokio::spawn(async move {
            engine.enroll(i as IdentityId, photos).await
        }));
    }
    for handle in handles {
        match handle.await {
            Ok(result) => result?,
            Err(e) => return Err(Error::Background(e.to_string())),
        }
    }

    println!("   [OK] Enrolled in {:?}", start.elapsed());
    println!("   Total identities: {}\n", engine.inner().store().len());

    println!("Identifying identity 17...");
    let results = engine.identify(faces[17].clone(), 0.2).await?;
    for (rank, c) in results.iter().enumerate() {
        println!(
            "     {}. ID {} (distance: {:.4})",
            rank + 1,
            c.identity_id,
            c.distance
        );
    }

    let _ = std::fs::remove_dir_all(&temp_dir);
    println!("\nAsync demo complete!");
    Ok(())
}

#[cfg(not(feature = "async"))]
fn main() {
    println!("Run with: cargo run --example async_demo --features async");
}
