//! Quick start example for FaceVault.
//!
//! Enrolls three people from a few "photos" each, then verifies and
//! identifies probes against them.
//!
//! Run with: RUST_LOG=facevault_core=debug cargo run --example quickstart

use std::sync::Arc;

use facevault::prelude::*;
use facevault::{within_threshold, BoundingBox, FaceDetection};
use rand::Rng;
use tracing_subscriber::EnvFilter;

const DIM: usize = 8;

/// Stand-in for a real detector and embedding network: the image bytes are
/// pixel intensities, and the embedding is the mean of each eighth.
struct ToyModel;

impl FaceModel for ToyModel {
    fn detect(&mut self, image: &[u8]) -> Result<Vec<FaceDetection>> {
        if image.len() < DIM {
            return Ok(Vec::new());
        }
        Ok(vec![FaceDetection {
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: image.len() as u32,
                height: 1,
            },
            confidence: 0.98,
        }])
    }

    fn extract(&mut self, image: &[u8], _face: &FaceDetection) -> Result<Vec<f32>> {
        let chunk = image.len() / DIM;
        Ok(image
            .chunks(chunk)
            .take(DIM)
            .map(|c| c.iter().map(|&p| p as f32).sum::<f32>() / c.len() as f32)
            .collect())
    }
}

/// Renders a noisy "photo" of a face described by eight intensities.
fn photo(face: &[u8; DIM]) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    face.iter()
        .flat_map(|&level| std::iter::repeat(level).take(16))
        .map(|p| p.saturating_add(rng.gen_range(0..12)))
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("FaceVault Quick Start Example\n");

    let store = Arc::new(MemoryStore::new(StoreConfig::new(DIM)));
    let pool = ModelPool::new(vec![ToyModel, ToyModel], PoolConfig::new(DIM))?;
    let engine = FaceEngine::new(store, pool, EngineConfig::new())?;

    let people: [(IdentityId, &str, [u8; DIM]); 3] = [
        (1, "Ada", [200, 40, 40, 180, 90, 30, 150, 60]),
        (2, "Brian", [30, 190, 120, 20, 60, 200, 40, 100]),
        (3, "Chen", [90, 90, 200, 110, 30, 40, 80, 210]),
    ];

    println!("Enrolling {} people, 3 photos each...", people.len());
    for (id, name, face) in &people {
        let photos = [photo(face), photo(face), photo(face)];
        engine.enroll(*id, &photos)?;
        println!("  [OK] {} enrolled as {}", name, id);
    }
    println!();

    let probe = photo(&people[0].2);

    println!("Verifying a new photo of Ada:");
    for (id, name, _) in &people {
        let distance = engine.verify(&probe, *id)?;
        println!(
            "  vs {:<6} distance {:.4} {}",
            name,
            distance,
            if within_threshold(distance, 0.3) { "MATCH" } else { "" }
        );
    }
    println!();

    println!("Identifying with threshold 0.3:");
    for candidate in engine.identify(&probe, 0.3)? {
        println!(
            "  [ID: {}] distance {:.4}",
            candidate.identity_id, candidate.distance
        );
    }
    println!();

    match engine.identify(&[0u8; 4], 0.3) {
        Err(e) => println!("Blank image rejected: {} ({:?})", e, e.kind()),
        Ok(_) => println!("Blank image unexpectedly matched"),
    }

    println!("\nDone.");
    Ok(())
}
