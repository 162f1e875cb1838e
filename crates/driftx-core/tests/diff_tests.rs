#![allow(clippy::unwrap_used, clippy::expect_used)]

use driftx_core::diff::diff;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type Entity = (u8, u8);

fn entities(map: &BTreeMap<u8, u8>) -> Vec<Entity> {
    map.iter().map(|(k, v)| (*k, *v)).collect()
}

fn run(declared: &[Entity], observed: &[Entity]) -> driftx_core::Delta<Entity> {
    diff(declared, observed, |e| format!("{:03}", e.0), |a, b| a.1 == b.1)
}

proptest! {
    #[test]
    fn prop_every_identity_lands_in_one_bucket(
        declared in prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..32),
        observed in prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..32),
    ) {
        let delta = run(&entities(&declared), &entities(&observed));

        let only_declared: BTreeSet<u8> = delta.only_in_declared.iter().map(|e| e.0).collect();
        let only_observed: BTreeSet<u8> = delta.only_in_observed.iter().map(|e| e.0).collect();
        let changed: BTreeSet<u8> = delta.changed.iter().map(|(d, _)| d.0).collect();

        for (k, v) in &declared {
            match observed.get(k) {
                None => prop_assert!(only_declared.contains(k)),
                Some(o) if o == v => {
                    prop_assert!(!changed.contains(k));
                    prop_assert!(!only_declared.contains(k));
                }
                Some(_) => prop_assert!(changed.contains(k)),
            }
        }
        for k in observed.keys() {
            prop_assert_eq!(only_observed.contains(k), !declared.contains_key(k));
        }
        prop_assert!(only_declared.is_disjoint(&only_observed));
        prop_assert!(only_declared.is_disjoint(&changed));
    }

    #[test]
    fn prop_diff_against_itself_is_empty(
        side in prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..32),
    ) {
        let side = entities(&side);
        prop_assert!(run(&side, &side).is_empty());
    }

    #[test]
    fn prop_changed_pairs_carry_both_sides(
        declared in prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..32),
        observed in prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..32),
    ) {
        let delta = run(&entities(&declared), &entities(&observed));
        for (d, o) in &delta.changed {
            prop_assert_eq!(d.0, o.0);
            prop_assert_eq!(declared[&d.0], d.1);
            prop_assert_eq!(observed[&o.0], o.1);
        }
    }
}

#[test]
fn test_buckets_ignore_input_order() {
    let declared = vec![(3, 1), (1, 1), (2, 1)];
    let shuffled = vec![(2, 1), (3, 1), (1, 1)];
    let observed = vec![(9, 9)];

    assert_eq!(run(&declared, &observed), run(&shuffled, &observed));
    assert_eq!(
        run(&declared, &observed).only_in_declared,
        vec![(1, 1), (2, 1), (3, 1)]
    );
}

#[test]
fn test_counts_sum_buckets() {
    let delta = run(&[(1, 1), (2, 2)], &[(2, 3), (4, 4)]);
    let counts = delta.counts();
    assert_eq!(counts.only_in_declared, 1);
    assert_eq!(counts.only_in_observed, 1);
    assert_eq!(counts.changed, 1);
    assert_eq!(counts.total(), 3);
}
