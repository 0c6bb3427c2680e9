use std::collections::HashSet;
use std::hash::Hash;

/// Running collection of unique identifiers gathered across scroll iterations.
///
/// Grows monotonically; remembers insertion order so output files are
/// deterministic for a given page.
#[derive(Debug, Clone)]
pub struct Accumulator<K> {
    seen: HashSet<K>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone> Accumulator<K> {
    pub fn new() -> Self {
        Accumulator {
            seen: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Record `key`. Returns false when it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push(key);
        true
    }

    /// Record every key, returning how many were new.
    pub fn extend_new<I: IntoIterator<Item = K>>(&mut self, keys: I) -> usize {
        keys.into_iter().filter(|k| self.insert(k.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn into_vec(self) -> Vec<K> {
        self.order
    }
}

impl<K: Eq + Hash + Clone> Default for Accumulator<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_first_occurrence_order() {
        let mut acc = Accumulator::new();
        assert!(acc.insert("b".to_string()));
        assert!(acc.insert("a".to_string()));
        assert!(!acc.insert("b".to_string()));

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.iter().cloned().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_extend_new_counts_only_unseen() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.extend_new(vec![1, 2, 2, 3]), 3);
        assert_eq!(acc.extend_new(vec![3, 4]), 1);
        assert_eq!(acc.into_vec(), vec![1, 2, 3, 4]);
    }
}
