//! Insertion-ordered collections with unique keys.
//!
//! Every container in a sensor-data tree (nodes of a response, timestamps of a
//! node, fields of a timestamp, parameters of a control command) keeps its
//! children in the order they were added while answering membership queries
//! through a companion key set. Inserting a duplicate key is not an error: the
//! insert is dropped and `None` is returned.

use std::collections::HashSet;

/// An element addressed by a unique string key among its siblings.
pub trait Keyed {
    /// The key identifying this element within its container.
    fn key(&self) -> &str;
}

impl Keyed for String {
    fn key(&self) -> &str {
        self
    }
}

/// Ordered sequence of children plus the set of their keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedSet<T> {
    /// Children in insertion order
    items: Vec<T>,
    /// Keys of `items`, rebuilt whenever the collection is replaced
    keys: HashSet<String>,
}

impl<T> Default for KeyedSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            keys: HashSet::new(),
        }
    }
}

impl<T: Keyed> KeyedSet<T> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an element with this key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Get an element by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter().find(|item| item.key() == key)
    }

    /// Get a mutable reference to an element by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        if !self.keys.contains(key) {
            return None;
        }
        self.items.iter_mut().find(|item| item.key() == key)
    }

    /// Append an element.
    ///
    /// Returns the stored element, or `None` if its key was already present,
    /// in which case the set is left unchanged.
    pub fn insert(&mut self, item: T) -> Option<&mut T> {
        if self.keys.contains(item.key()) {
            tracing::debug!(key = item.key(), "Ignoring duplicate key");
            return None;
        }
        self.keys.insert(item.key().to_string());
        self.items.push(item);
        self.items.last_mut()
    }

    /// Get the element with this key, appending one built by `make` if absent.
    pub fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> T) -> &mut T {
        let index = match self.items.iter().position(|item| item.key() == key) {
            Some(index) => index,
            None => {
                let item = make();
                debug_assert_eq!(item.key(), key);
                self.keys.insert(item.key().to_string());
                self.items.push(item);
                self.items.len() - 1
            }
        };
        &mut self.items[index]
    }

    /// Remove the element with this key.
    ///
    /// Returns `true` if an element was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.items.retain(|item| item.key() != key);
        true
    }

    /// Replace every element, applying the duplicate rule while repopulating.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) {
        self.clear();
        for item in items {
            self.insert(item);
        }
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Iterate over the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(Keyed::key)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consume the set, yielding its elements in insertion order.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Keyed> FromIterator<T> for KeyedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.replace_all(iter);
        set
    }
}

impl<'a, T> IntoIterator for &'a KeyedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> IntoIterator for KeyedSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &KeyedSet<String>) -> Vec<&str> {
        set.keys().collect()
    }

    #[test]
    fn insert_preserves_order() {
        let mut set = KeyedSet::new();
        set.insert("b".to_string());
        set.insert("a".to_string());
        set.insert("c".to_string());

        assert_eq!(names(&set), vec!["b", "a", "c"]);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut set = KeyedSet::new();
        assert!(set.insert("a".to_string()).is_some());
        let before = set.clone();

        assert!(set.insert("a".to_string()).is_none());
        assert_eq!(set, before);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_missing_returns_false() {
        let mut set: KeyedSet<String> = ["a", "b"].iter().map(ToString::to_string).collect();
        let before = set.clone();

        assert!(!set.remove("zzz"));
        assert_eq!(set, before);

        assert!(set.remove("a"));
        assert!(!set.contains("a"));
        assert_eq!(names(&set), vec!["b"]);
    }

    #[test]
    fn replace_all_rebuilds_keys_and_dedups() {
        let mut set: KeyedSet<String> = ["a", "b"].iter().map(ToString::to_string).collect();
        set.replace_all(["x", "y", "x"].iter().map(ToString::to_string));

        assert_eq!(names(&set), vec!["x", "y"]);
        assert!(!set.contains("a"));
        assert!(set.contains("y"));
    }

    #[test]
    fn get_or_insert_with_reuses_existing() {
        let mut set = KeyedSet::new();
        set.insert("a".to_string());
        set.get_or_insert_with("a", || unreachable!());
        set.get_or_insert_with("b", || "b".to_string());

        assert_eq!(names(&set), vec!["a", "b"]);
    }
}
