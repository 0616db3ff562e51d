// Property-based invariants of the authorization model and the composite
// merge.

use proptest::prelude::*;
use semsearch::{index_name, smart_merge, AllowedGroups, AuthorizationGroup};
use serde_json::Value;

fn group_strategy() -> impl Strategy<Value = AuthorizationGroup> {
    (
        "[a-z]{1,8}",
        proptest::collection::vec("[a-z0-9]{1,6}".prop_map(String::from), 0..3),
    )
        .prop_map(|(name, variables)| AuthorizationGroup::with_variables(name, variables))
}

fn group_set_strategy() -> impl Strategy<Value = (Vec<AuthorizationGroup>, Vec<AuthorizationGroup>)>
{
    proptest::collection::vec(group_strategy(), 0..6).prop_flat_map(|groups| {
        let shuffled = Just(groups.clone()).prop_shuffle();
        (Just(groups), shuffled)
    })
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        scalar_strategy(),
        proptest::collection::vec(scalar_strategy(), 0..4).prop_map(Value::Array),
    ]
}

fn document_strategy() -> impl Strategy<Value = Value> {
    proptest::collection::btree_map("[a-z]{1,5}".prop_map(String::from), leaf_strategy(), 0..6)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}

proptest! {
    // The index name is a pure function of the identity tuple: permuting
    // the group list never changes it.
    #[test]
    fn index_name_is_permutation_invariant((original, shuffled) in group_set_strategy()) {
        let a = AllowedGroups::new(original);
        let b = AllowedGroups::new(shuffled);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.cache_key(), b.cache_key());
        prop_assert_eq!(index_name("documents", &a), index_name("documents", &b));
    }

    #[test]
    fn index_name_separates_types((original, _) in group_set_strategy()) {
        let groups = AllowedGroups::new(original);
        prop_assert_ne!(index_name("documents", &groups), index_name("cases", &groups));
    }

    // Every canonical set is a subset of itself and is covered by itself.
    #[test]
    fn subset_is_reflexive((original, _) in group_set_strategy()) {
        let groups = AllowedGroups::new(original);
        prop_assert!(groups.is_subset_of(&groups));
        prop_assert!(groups.covered_by([&groups]));
    }

    // Splitting a set into halves yields two subsets that jointly cover it.
    #[test]
    fn split_halves_cover_the_whole((original, _) in group_set_strategy()) {
        let groups = AllowedGroups::new(original.clone());
        let middle = original.len() / 2;
        let left = AllowedGroups::new(original[..middle].to_vec());
        let right = AllowedGroups::new(original[middle..].to_vec());
        prop_assert!(left.is_subset_of(&groups));
        prop_assert!(right.is_subset_of(&groups));
        prop_assert!(groups.covered_by([&left, &right]));
    }

    // smart_merge(a, a) == a for maps with scalar or array leaves.
    #[test]
    fn smart_merge_is_idempotent(document in document_strategy()) {
        let merged = smart_merge(document.clone(), document.clone()).unwrap();
        prop_assert_eq!(merged, document);
    }

    // Null absorption commutes.
    #[test]
    fn null_absorption_commutes(document in document_strategy()) {
        let left = smart_merge(Value::Null, document.clone()).unwrap();
        let right = smart_merge(document.clone(), Value::Null).unwrap();
        prop_assert_eq!(&left, &document);
        prop_assert_eq!(&right, &document);
    }

    // Scalar combination commutes up to element order.
    #[test]
    fn scalar_combination_commutes(a in scalar_strategy(), b in scalar_strategy()) {
        let ab = smart_merge(a.clone(), b.clone()).unwrap();
        let ba = smart_merge(b, a).unwrap();
        match (ab, ba) {
            (Value::Array(mut x), Value::Array(mut y)) => {
                let key = |v: &Value| v.to_string();
                x.sort_by_key(key);
                y.sort_by_key(key);
                prop_assert_eq!(x, y);
            }
            (x, y) => prop_assert_eq!(x, y),
        }
    }
}
