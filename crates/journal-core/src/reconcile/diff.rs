//! Keyed set differences

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Writes needed to turn one collection into another.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffSet<T> {
    pub to_insert: Vec<T>,
    pub to_delete: Vec<T>,
    pub to_update: Vec<T>,
}

impl<T> DiffSet<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty() && self.to_update.is_empty()
    }
}

impl<T> Default for DiffSet<T> {
    fn default() -> Self {
        Self {
            to_insert: Vec::new(),
            to_delete: Vec::new(),
            to_update: Vec::new(),
        }
    }
}

/// Diff by identity only. Items present on both sides are left alone.
pub(crate) fn by_key<T, K, F>(existing: Vec<T>, desired: &[T], key: F) -> DiffSet<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let desired_keys: HashSet<K> = desired.iter().map(&key).collect();
    let existing_keys: HashSet<K> = existing.iter().map(&key).collect();

    DiffSet {
        to_insert: desired
            .iter()
            .filter(|item| !existing_keys.contains(&key(item)))
            .cloned()
            .collect(),
        to_delete: existing
            .into_iter()
            .filter(|item| !desired_keys.contains(&key(item)))
            .collect(),
        to_update: Vec::new(),
    }
}

/// Diff by identity, also collecting items whose value changed.
pub(crate) fn by_key_with_updates<T, K, F>(existing: Vec<T>, desired: &[T], key: F) -> DiffSet<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut existing_by_key: HashMap<K, T> =
        existing.into_iter().map(|item| (key(&item), item)).collect();

    let mut diff = DiffSet::default();
    for item in desired {
        match existing_by_key.remove(&key(item)) {
            None => diff.to_insert.push(item.clone()),
            Some(current) if current != *item => diff.to_update.push(item.clone()),
            Some(_) => {}
        }
    }
    diff.to_delete = existing_by_key.into_values().collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: &'static str,
        value: i32,
    }

    const fn item(id: &'static str, value: i32) -> Item {
        Item { id, value }
    }

    #[test]
    fn by_key_ignores_value_changes() {
        let diff = by_key(
            vec![item("a", 1), item("b", 1)],
            &[item("b", 2), item("c", 1)],
            |item| item.id,
        );

        assert_eq!(diff.to_insert, vec![item("c", 1)]);
        assert_eq!(diff.to_delete, vec![item("a", 1)]);
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn by_key_with_updates_reports_changed_values() {
        let diff = by_key_with_updates(
            vec![item("a", 1), item("b", 1)],
            &[item("a", 1), item("b", 2)],
            |item| item.id,
        );

        assert!(diff.to_insert.is_empty());
        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.to_update, vec![item("b", 2)]);
    }

    #[test]
    fn identical_collections_produce_empty_diff() {
        let items = vec![item("a", 1), item("b", 2)];
        assert!(by_key(items.clone(), &items, |item| item.id).is_empty());
        assert!(by_key_with_updates(items.clone(), &items, |item| item.id).is_empty());
    }
}
