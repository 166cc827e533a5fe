//! Property-based tests for store.rs (bounded history and persistence).
//!
//! Validates:
//! 1. Eviction keeps exactly the N most recent records, newest first
//! 2. A flushed store reloads to the same histories
//! 3. Deleting every record removes the key and its persisted unit

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use layoutkeep_core::snapshot::{LayoutNode, Snapshot, Tab, WindowState};
use layoutkeep_core::store::{ArrangementStore, MemoryBackend, StoreConfig};

// =============================================================================
// Helpers
// =============================================================================

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn snap(ts: u64) -> Snapshot {
    Snapshot::new(
        WindowState::new(LayoutNode::tab_group(vec![Tab::new(format!("doc{ts}.md"))])),
        ts,
    )
}

// =============================================================================
// Strategies
// =============================================================================

/// Distinct save timestamps in arbitrary order.
fn arb_timestamps() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(1u64..1_000_000, 1..20)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn arb_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a.md".to_string()),
        Just("notes/b.md".to_string()),
        Just("Ünïcode/ß.md".to_string()),
        Just("spaces in name.md".to_string()),
    ]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn eviction_keeps_most_recent(
        stamps in arb_timestamps(),
        max_entries in 1usize..=5,
    ) {
        let saved = paused_runtime().block_on(async {
            let store = ArrangementStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default());
            for ts in &stamps {
                store.set_at("doc", snap(*ts), Some(max_entries), *ts).await.unwrap();
            }
            store
                .get_all("doc")
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.saved_at)
                .collect::<Vec<_>>()
        });

        let mut expected = stamps.clone();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(max_entries);
        prop_assert_eq!(saved, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn flushed_store_reloads_identically(
        writes in prop::collection::vec((arb_key(), 1u64..10_000, 1usize..=5), 1..25),
    ) {
        let (before, after) = paused_runtime().block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let store = ArrangementStore::new(backend.clone(), StoreConfig::default());
            for (key, ts, max) in &writes {
                store.set_at(key, snap(*ts), Some(*max), *ts).await.unwrap();
            }
            store.cleanup().await.unwrap();
            let before = store.export_all().await.unwrap();

            let reopened = ArrangementStore::new(backend, StoreConfig::default());
            let after = reopened.export_all().await.unwrap();
            (before, after)
        });
        prop_assert_eq!(before, after);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn deleting_all_records_drops_key(stamps in arb_timestamps()) {
        let (keys, unit) = paused_runtime().block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let store = ArrangementStore::new(backend.clone(), StoreConfig::default());
            for ts in &stamps {
                store.set_at("doc", snap(*ts), Some(5), *ts).await.unwrap();
            }
            store.cleanup().await.unwrap();
            let kept: BTreeSet<u64> = store
                .get_all("doc")
                .await
                .unwrap()
                .iter()
                .map(|r| r.saved_at)
                .collect();
            for ts in kept {
                assert!(store.delete_arrangement("doc", ts).await.unwrap());
            }
            store.cleanup().await.unwrap();
            (store.keys().await.unwrap(), backend.unit("doc"))
        });
        prop_assert!(keys.is_empty());
        prop_assert!(unit.is_none());
    }
}
