//! Fixed-capacity insertion-ordered map.
//!
//! A ring of keys in insertion order plus a hash map for lookup. Re-inserting
//! an existing key replaces its value without refreshing its age.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Map that evicts its oldest entries once it grows past `capacity`.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    order: VecDeque<K>,
    entries: HashMap<K, V>,
    capacity: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Insert without evicting; returns the previous value for `key`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.insert(key.clone(), value);
        if previous.is_none() {
            self.order.push_back(key);
        }
        previous
    }

    /// Drop oldest entries until the map fits its capacity; returns what was dropped.
    pub fn evict_oldest_if_over_capacity(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.entries.remove(&key) {
                evicted.push((key, value));
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_within_capacity() {
        let mut map = BoundedMap::new(3);
        map.insert("a", 1);
        map.insert("b", 2);
        assert!(map.evict_oldest_if_over_capacity().is_empty());
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"a"), Some(&1));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut map = BoundedMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);
        let evicted = map.evict_oldest_if_over_capacity();
        assert_eq!(evicted, vec![("a", 1)]);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_reinsert_keeps_age() {
        let mut map = BoundedMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.insert("a", 10), Some(1));
        map.insert("c", 3);
        let evicted = map.evict_oldest_if_over_capacity();
        assert_eq!(evicted, vec![("a", 10)]);
    }

    #[test]
    fn test_remove_drops_key_from_order() {
        let mut map = BoundedMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.remove(&"a"), Some(1));
        map.insert("c", 3);
        assert!(map.evict_oldest_if_over_capacity().is_empty());
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let map: BoundedMap<&str, i32> = BoundedMap::new(0);
        assert_eq!(map.capacity(), 1);
    }
}
