//! Digest stability of layer indexes and bundle manifests.

use std::collections::BTreeMap;

use mops_bundles::model::ExternalDescriptor;
use mops_bundles::{BundleManifest, LayerIndex, LayerIndexEntry, StorageTier};
use proptest::prelude::*;

fn entry(i: usize, external: bool) -> LayerIndexEntry {
    let path = format!("data/part-{:03}.bin", i);
    if external {
        LayerIndexEntry::external(
            path.as_str(),
            "data",
            ExternalDescriptor {
                uri: format!("s3://bucket/{}", path),
                sha256: format!("{:064x}", i),
                size: i as u64 * 10,
                tier: Some(StorageTier::Cool.to_string()),
            },
        )
    } else {
        LayerIndexEntry::oras(path.as_str(), "data", format!("sha256:{:064x}", i), i as u64)
    }
}

proptest! {
    #[test]
    fn layer_index_digest_ignores_entry_order(
        flags in prop::collection::vec(any::<bool>(), 1..24),
        seed in any::<u64>(),
    ) {
        let entries: Vec<LayerIndexEntry> = flags
            .iter()
            .enumerate()
            .map(|(i, external)| entry(i, *external))
            .collect();

        let mut shuffled = entries.clone();
        // Deterministic Fisher-Yates driven by the seed.
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state >> 33) as usize % (i + 1));
        }

        let sorted = LayerIndex::new("data", entries);
        let unsorted = LayerIndex {
            entries: shuffled,
            ..sorted.clone()
        };
        prop_assert_eq!(sorted.digest().unwrap(), unsorted.digest().unwrap());
        prop_assert_eq!(sorted.canonical_bytes().unwrap(), unsorted.canonical_bytes().unwrap());
    }

    #[test]
    fn manifest_digest_is_independent_of_insertion_order(
        layers in prop::collection::btree_map("[a-z]{1,8}", "[0-9a-f]{64}", 1..6),
    ) {
        let pairs: Vec<(String, String)> = layers
            .iter()
            .map(|(name, hex)| (name.clone(), format!("sha256:{}", hex)))
            .collect();
        let roles: BTreeMap<String, Vec<String>> =
            [("default".to_string(), pairs.iter().map(|(n, _)| n.clone()).collect())].into();

        let forward: BTreeMap<_, _> = pairs.iter().cloned().collect();
        let backward: BTreeMap<_, _> = pairs.iter().rev().cloned().collect();

        let a = BundleManifest::new("demo", "1.0", roles.clone(), forward, false);
        let b = BundleManifest::new("demo", "1.0", roles, backward, false);
        prop_assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let bytes = a.canonical_bytes().unwrap();
        let reparsed = BundleManifest::from_slice(&bytes).unwrap();
        prop_assert_eq!(reparsed.canonical_bytes().unwrap(), bytes);
    }
}

#[test]
fn test_canonical_layer_index_layout() {
    let index = LayerIndex::new(
        "code",
        vec![
            LayerIndexEntry::oras("src/b.py", "code", format!("sha256:{}", "b".repeat(64)), 2),
            LayerIndexEntry::oras("src/a.py", "code", format!("sha256:{}", "a".repeat(64)), 1),
        ],
    );
    let text = String::from_utf8(index.canonical_bytes().unwrap()).unwrap();

    assert!(!text.contains(' '));
    assert!(!text.contains('\n'));
    assert!(text.find("src/a.py").unwrap() < text.find("src/b.py").unwrap());
    assert!(text.starts_with(r#"{"entries":[{"digest":"sha256:"#));
}
