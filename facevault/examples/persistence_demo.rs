//! Persistence demonstration for FaceVault.
//!
//! This example shows how to:
//! 1. Create a file-backed store and enroll identities
//! 2. Close and reopen it (simulating restart)
//! 3. Re-enroll and remove identities
//! 4. Compact the record log

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use facevault::prelude::*;
use facevault::distance::l2_normalize;
use tracing_subscriber::EnvFilter;

const DIM: usize = 8;

fn embedding(raw: [f32; DIM]) -> Embedding {
    Embedding::from_vec(l2_normalize(&raw))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store_path = "./demo_identities";

    // Clean up any previous run
    let _ = fs::remove_dir_all(store_path);

    println!("FaceVault Persistence Demo\n");

    let config = StoreConfig::new(DIM).with_lock_timeout(Duration::from_secs(1));
    println!(
        "Store config: {}\n",
        serde_json::to_string(&config).unwrap_or_default()
    );

    println!("Phase 1: Enrolling identities...");
    {
        let store = Arc::new(FileStore::open_or_create(store_path, config.clone())?);
        let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::Renormalize);

        enroller.enroll(
            1,
            &[
                embedding([0.9, 0.8, 0.1, 0.0, 0.1, 0.0, 0.2, 0.1]),
                embedding([0.85, 0.9, 0.15, 0.05, 0.1, 0.0, 0.25, 0.15]),
            ],
        )?;
        enroller.enroll(2, &[embedding([0.1, 0.2, 0.9, 0.85, 0.0, 0.1, 0.0, 0.2])])?;
        enroller.enroll(3, &[embedding([0.2, 0.1, 0.7, 0.8, 0.6, 0.7, 0.1, 0.3])])?;

        println!("  [OK] {} identities stored", store.len());
    }
    println!("  Store closed\n");

    println!("Phase 2: Reopening store...");
    let store = Arc::new(FileStore::open_or_create(store_path, config)?);
    println!("  [OK] Recovered {} identities", store.len());

    let matcher = Matcher::new(Arc::clone(&store));
    let probe = embedding([0.88, 0.85, 0.12, 0.03, 0.12, 0.02, 0.22, 0.12]);
    for candidate in matcher.identify(&probe, 0.5)? {
        println!(
            "  [ID: {}] distance {:.4}",
            candidate.identity_id, candidate.distance
        );
    }
    println!();

    println!("Phase 3: Re-enrolling 2 and removing 3...");
    let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::Renormalize);
    enroller.enroll(2, &[embedding([0.8, 0.7, 0.2, 0.1, 0.15, 0.05, 0.3, 0.2])])?;
    store.remove(3)?;

    let record = store.record(2)?;
    println!("  Identity 2 enrolled at {:?}", record.enrolled_at);
    println!("  Identities now: {}", store.len());
    for candidate in matcher.identify(&probe, 0.5)? {
        println!(
            "  [ID: {}] distance {:.4}",
            candidate.identity_id, candidate.distance
        );
    }
    println!();

    println!("Phase 4: Compacting...");
    let log = std::path::Path::new(store_path).join("records.log");
    let before = fs::metadata(&log).map(|m| m.len()).unwrap_or(0);
    store.compact()?;
    let after = fs::metadata(&log).map(|m| m.len()).unwrap_or(0);
    println!("  [OK] Log {} -> {} bytes\n", before, after);

    let _ = fs::remove_dir_all(store_path);
    println!("Persistence demo complete!");
    Ok(())
}
