//! Persisted axis ordering.
//!
//! The stored order is rewritten only by [`set_order`], which backs the
//! drag-reorder of whole columns or rows. Rendering merges it with the live
//! keys through [`merge_order`] without writing anything back.

use std::collections::HashSet;
use std::hash::Hash;

/// Stored order restricted to live keys, followed by unseen live keys in
/// first-seen order. Duplicates in either input are dropped.
pub fn merge_order<K>(stored: &[K], live: &[K]) -> Vec<K>
where
    K: Eq + Hash + Clone,
{
    let live_set: HashSet<&K> = live.iter().collect();
    let mut emitted: HashSet<&K> = HashSet::with_capacity(live.len());
    let mut merged = Vec::with_capacity(live.len());

    for key in stored {
        if live_set.contains(key) && emitted.insert(key) {
            merged.push(key.clone());
        }
    }
    for key in live {
        if emitted.insert(key) {
            merged.push(key.clone());
        }
    }
    merged
}

/// Normalize a user-supplied order before storing it: first occurrence wins.
pub fn set_order<K>(new_order: &[K]) -> Vec<K>
where
    K: Eq + Hash + Clone,
{
    let mut seen: HashSet<&K> = HashSet::with_capacity(new_order.len());
    new_order
        .iter()
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::GroupKey;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_preserves_stored_and_appends_new() {
        let merged = merge_order(&keys(&["b", "a"]), &keys(&["a", "b", "c"]));
        assert_eq!(merged, keys(&["b", "a", "c"]));
    }

    #[test]
    fn test_merge_drops_stale_keys() {
        let merged = merge_order(&keys(&["x", "y"]), &keys(&["y"]));
        assert_eq!(merged, keys(&["y"]));
    }

    #[test]
    fn test_merge_dedupes_stored_repeats() {
        let merged = merge_order(&keys(&["a", "b", "a", "b"]), &keys(&["b", "a"]));
        assert_eq!(merged, keys(&["a", "b"]));
    }

    #[test]
    fn test_merge_with_empty_stored_is_live_order() {
        let merged = merge_order(&[], &keys(&["c", "a", "c", "b"]));
        assert_eq!(merged, keys(&["c", "a", "b"]));
    }

    #[test]
    fn test_merge_with_empty_live_is_empty() {
        let merged: Vec<String> = merge_order(&keys(&["a"]), &[]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_set_order_dedupes() {
        assert_eq!(set_order(&keys(&["a", "a", "b"])), keys(&["a", "b"]));
        assert_eq!(set_order(&keys(&["b", "a", "b"])), keys(&["b", "a"]));
    }

    #[test]
    fn test_columns_with_new_live_value_render_after_stored() {
        let stored: Vec<GroupKey> = vec!["Todo".into(), "Doing".into(), "Done".into()];
        let live: Vec<GroupKey> =
            vec!["Blocked".into(), "Done".into(), "Todo".into(), "Doing".into()];
        let merged = merge_order(&stored, &live);
        assert_eq!(
            merged,
            vec![
                GroupKey::from("Todo"),
                GroupKey::from("Doing"),
                GroupKey::from("Done"),
                GroupKey::from("Blocked"),
            ]
        );
    }

    #[test]
    fn test_merge_keeps_number_and_text_keys_apart() {
        let stored = vec![GroupKey::from("1"), GroupKey::from(2)];
        let live = vec![GroupKey::from(1), GroupKey::from(2)];
        assert_eq!(
            merge_order(&stored, &live),
            vec![GroupKey::from(2), GroupKey::from(1)]
        );
    }
}
