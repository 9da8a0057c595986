use std::sync::Arc;

use facevault_core::distance::{euclidean_distance, l2_normalize};
use facevault_core::prelude::*;
use proptest::prelude::*;

const DIM: usize = 8;

fn unit_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, DIM)
        .prop_filter("non-zero", |v| v.iter().any(|x| x.abs() > 1e-3))
        .prop_map(|v| l2_normalize(&v))
}

fn populated_matcher(vectors: &[Vec<f32>]) -> Matcher<MemoryStore> {
    let store = Arc::new(MemoryStore::new(StoreConfig::new(DIM)));
    for (i, v) in vectors.iter().enumerate() {
        store.upsert(i as u64, Embedding::new(v)).unwrap();
    }
    Matcher::new(store)
}

proptest! {
    #[test]
    fn test_uniform_enrollment_stores_sample(v in unit_vector(), n in 1usize..6) {
        let store = Arc::new(MemoryStore::new(StoreConfig::new(DIM)));
        let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::Renormalize);

        let samples = vec![Embedding::new(&v); n];
        enroller.enroll(1, &samples).unwrap();

        let stored = store.get(1).unwrap();
        prop_assert!(euclidean_distance(stored.as_slice(), &v) < 1e-5);
    }

    #[test]
    fn test_identify_is_strict_and_sorted(
        vectors in proptest::collection::vec(unit_vector(), 0..40),
        probe in unit_vector(),
        threshold in 0.0f64..2.5
    ) {
        let matcher = populated_matcher(&vectors);
        let results = matcher.identify(&Embedding::new(&probe), threshold).unwrap();

        for c in &results {
            prop_assert!(c.distance < threshold);
        }
        for pair in results.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }

        // Nothing within the threshold is left out.
        let expected = vectors
            .iter()
            .filter(|v| euclidean_distance(&probe, v) < threshold)
            .count();
        prop_assert_eq!(results.len(), expected);
    }

    #[test]
    fn test_identify_top_is_prefix(
        vectors in proptest::collection::vec(unit_vector(), 0..40),
        probe in unit_vector(),
        limit in 0usize..10
    ) {
        let matcher = populated_matcher(&vectors);
        let probe = Embedding::new(&probe);

        let all = matcher.identify(&probe, 2.5).unwrap();
        let top = matcher.identify_top(&probe, 2.5, limit).unwrap();

        prop_assert_eq!(top.len(), all.len().min(limit));
        prop_assert_eq!(&all[..top.len()], &top[..]);
    }

    #[test]
    fn test_reenroll_replaces(first in unit_vector(), second in unit_vector()) {
        let store = Arc::new(MemoryStore::new(StoreConfig::new(DIM)));
        let enroller = EnrollmentAggregator::new(Arc::clone(&store), AggregationPolicy::MeanOnly);

        enroller.enroll(7, &[Embedding::new(&first)]).unwrap();
        enroller.enroll(7, &[Embedding::new(&second)]).unwrap();

        prop_assert_eq!(store.len(), 1);
        let stored = store.get(7).unwrap();
        prop_assert_eq!(stored.as_slice(), &second[..]);
    }

    #[test]
    fn test_distance_symmetric_and_zero_on_self(a in unit_vector(), b in unit_vector()) {
        prop_assert_eq!(euclidean_distance(&a, &b), euclidean_distance(&b, &a));
        prop_assert_eq!(euclidean_distance(&a, &a), 0.0);
    }
}
