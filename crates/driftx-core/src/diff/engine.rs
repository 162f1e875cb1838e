//! Identity-keyed comparison of two entity collections.

use crate::diff::model::Delta;
use std::collections::BTreeMap;

/// Compare `declared` against `observed`.
///
/// `observed` is indexed by `identity`; each declared entity is then looked
/// up. A miss lands in `only_in_declared`, a hit that fails `equals` lands in
/// `changed`, and every consumed key (equal or changed) is removed from the
/// index. Whatever is left in the index becomes `only_in_observed`.
///
/// Preconditions (caller bugs, not checked): `identity` is injective over
/// each side, and `equals` ignores provider-assigned fields.
///
/// Output buckets are ordered by identity.
pub fn diff<T, I, E>(declared: &[T], observed: &[T], identity: I, equals: E) -> Delta<T>
where
    T: Clone,
    I: Fn(&T) -> String,
    E: Fn(&T, &T) -> bool,
{
    let mut observed_index: BTreeMap<String, &T> =
        observed.iter().map(|o| (identity(o), o)).collect();

    let mut only_in_declared: BTreeMap<String, T> = BTreeMap::new();
    let mut changed: BTreeMap<String, (T, T)> = BTreeMap::new();

    for d in declared {
        let key = identity(d);
        match observed_index.remove(&key) {
            None => {
                only_in_declared.insert(key, d.clone());
            }
            Some(o) => {
                if !equals(d, o) {
                    changed.insert(key, (d.clone(), o.clone()));
                }
            }
        }
    }

    Delta {
        only_in_declared: only_in_declared.into_values().collect(),
        only_in_observed: observed_index.into_values().cloned().collect(),
        changed: changed.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Net {
        name: &'static str,
        cidr: &'static str,
    }

    fn id(n: &Net) -> String {
        n.name.to_string()
    }

    fn eq(a: &Net, b: &Net) -> bool {
        a.cidr == b.cidr
    }

    #[test]
    fn test_classifies_each_bucket() {
        let declared = vec![
            Net { name: "a", cidr: "10.0.0.0/16" },
            Net { name: "b", cidr: "10.1.0.0/16" },
            Net { name: "c", cidr: "10.2.0.0/16" },
        ];
        let observed = vec![
            Net { name: "b", cidr: "10.1.0.0/16" },
            Net { name: "c", cidr: "10.9.0.0/16" },
            Net { name: "d", cidr: "10.3.0.0/16" },
        ];

        let delta = diff(&declared, &observed, id, eq);

        assert_eq!(delta.only_in_declared, vec![declared[0].clone()]);
        assert_eq!(delta.only_in_observed, vec![observed[2].clone()]);
        assert_eq!(
            delta.changed,
            vec![(declared[2].clone(), observed[1].clone())]
        );
    }

    #[test]
    fn test_output_independent_of_input_order() {
        let a = vec![
            Net { name: "z", cidr: "1" },
            Net { name: "m", cidr: "2" },
            Net { name: "a", cidr: "3" },
        ];
        let mut reversed = a.clone();
        reversed.reverse();

        let d1 = diff(&a, &[], id, eq);
        let d2 = diff(&reversed, &[], id, eq);

        assert_eq!(d1, d2);
        assert_eq!(d1.only_in_declared[0].name, "a");
    }

    #[test]
    fn test_empty_inputs() {
        let delta: Delta<Net> = diff(&[], &[], id, eq);
        assert!(delta.is_empty());
        assert_eq!(delta.counts().total(), 0);
    }
}
