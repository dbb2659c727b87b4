use std::collections::HashMap;

use crate::value::Value;

/// An LLSD map: string keys with insertion order preserved.
///
/// Keys are unique. Order only matters for encoding; equality and lookup go
/// by key, so two maps holding the same entries in a different order are
/// equal.
#[derive(Clone, Default)]
pub struct Map {
    entries: Vec<(String, Value)>,
    // key -> position in `entries`
    index: HashMap<String, usize>,
}

impl Map {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|idx| &self.entries[idx].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.position(key).map(|idx| &mut self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Insert `value` under `key`, returning the previous value if any.
    ///
    /// An existing key keeps its position and only has its value replaced.
    /// The decoder relies on this: a duplicate key in the input resolves to
    /// the last value seen, at the position of the first occurrence.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Remove `key`, keeping the relative order of the remaining entries.
    ///
    /// Linear in the number of entries after `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        for (key, _) in &self.entries[idx..] {
            if let Some(slot) = self.index.get_mut(key) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.entries.iter().map(|(_, value)| value)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

/// Borrowing iterator over map entries, in insertion order.
pub struct Iter<'a> {
    inner: std::slice::Iter<'a, (String, Value)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, value)| (key.as_str(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> IntoIterator for &'a Map {
    type Item = (&'a str, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Map {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Map {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order() {
        let mut map = Map::new();
        map.insert("b", 1);
        map.insert("a", 2);
        map.insert("c", 3);

        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn insert_existing_key_replaces_in_place() {
        let mut map = Map::new();
        map.insert("first", 1);
        map.insert("second", 2);

        let previous = map.insert("first", 10);

        assert_eq!(previous, Some(Value::Integer(1)));
        assert_eq!(map.len(), 2);
        let entries: Vec<(&str, &Value)> = map.iter().collect();
        assert_eq!(entries[0], ("first", &Value::Integer(10)));
        assert_eq!(entries[1], ("second", &Value::Integer(2)));
    }

    #[test]
    fn equality_ignores_order() {
        let left: Map = [("x", 1), ("y", 2)].into_iter().collect();
        let right: Map = [("y", 2), ("x", 1)].into_iter().collect();
        assert_eq!(left, right);

        let different: Map = [("x", 1), ("y", 3)].into_iter().collect();
        assert_ne!(left, different);
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut map: Map = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();

        assert_eq!(map.remove("b"), Some(Value::Integer(2)));
        assert_eq!(map.remove("missing"), None);

        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(map.get("c"), Some(&Value::Integer(3)));

        map.insert("b", 4);
        map.insert("a", 5);
        let entries: Vec<(&str, &Value)> = map.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("a", &Value::Integer(5)),
                ("c", &Value::Integer(3)),
                ("b", &Value::Integer(4)),
            ]
        );
    }

    #[test]
    fn large_map_builds_in_linear_time() {
        let mut map = Map::new();
        for n in 0..200_000 {
            map.insert(format!("k{n}"), n);
        }
        map.insert("k0", -1);

        assert_eq!(map.len(), 200_000);
        assert_eq!(map.get("k199999"), Some(&Value::Integer(199_999)));
        assert_eq!(map.keys().next(), Some("k0"));
        assert_eq!(map.get("k0"), Some(&Value::Integer(-1)));
    }

    #[test]
    fn get_mut_updates_value() {
        let mut map: Map = [("n", 1)].into_iter().collect();
        if let Some(value) = map.get_mut("n") {
            *value = Value::Integer(5);
        }
        assert_eq!(map.get("n"), Some(&Value::Integer(5)));
        assert!(map.contains_key("n"));
        assert!(!map.contains_key("m"));
    }
}
