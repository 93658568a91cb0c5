//! Property-based test generators using proptest.

use ferry_migrate::{Record, SampleItem};
use ferry_sync::Mutation;
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for record keys accepted by every store.
pub fn record_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for record payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for records with distinct keys.
pub fn records_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_map(record_key_strategy(), payload_strategy(), min..max).prop_map(
        |records| {
            records
                .into_iter()
                .map(|(key, payload)| Record::new(key, payload))
                .collect()
        },
    )
}

/// Strategy for a mutation on one of `entity_count` entities.
pub fn mutation_strategy(entity_count: usize) -> impl Strategy<Value = Mutation> {
    (0..entity_count.max(1), payload_strategy())
        .prop_map(|(entity, payload)| Mutation::new("note", format!("entity-{entity}"), payload))
}

/// Strategy for a sample of identical items: consistent per-item timing and
/// size, with between `min` and `max` items.
pub fn consistent_sample_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<SampleItem>> {
    (1u64..10_000, 1u64..50, min..max).prop_map(|(size_bytes, millis, count)| {
        vec![SampleItem::new(size_bytes, Duration::from_millis(millis)); count]
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn record_keys_are_distinct(records in records_strategy(1, 50)) {
            let keys: HashSet<_> = records.iter().map(|r| r.key.clone()).collect();
            prop_assert_eq!(keys.len(), records.len());
        }

        #[test]
        fn consistent_samples_share_timing(sample in consistent_sample_strategy(1, 40)) {
            let first = sample[0];
            prop_assert!(sample.iter().all(|item| *item == first));
        }

        #[test]
        fn mutations_target_known_entities(mutation in mutation_strategy(3)) {
            let known = ["entity-0", "entity-1", "entity-2"];
            prop_assert!(known.contains(&mutation.entity_id.as_str()));
        }
    }
}
