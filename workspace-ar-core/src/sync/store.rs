//! Replicated object store
//!
//! A mapping from object id to record that also remembers the order in
//! which ids were first inserted, so resync bursts are deterministic.

use std::collections::HashMap;

use super::protocol::{ObjectId, ObjectRecord};

#[derive(Debug, Default, Clone)]
pub struct ObjectStore {
    /// Records in store order
    records: Vec<ObjectRecord>,
    /// Position of each id in `records`
    index: HashMap<ObjectId, usize>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the record for `record.id`.
    ///
    /// A replace keeps the record's original position. Returns the
    /// previous record, if any.
    pub fn upsert(&mut self, record: ObjectRecord) -> Option<ObjectRecord> {
        match self.index.get(&record.id) {
            Some(&pos) => Some(std::mem::replace(&mut self.records[pos], record)),
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    /// Remove a record, no-op if absent
    pub fn remove(&mut self, id: &ObjectId) -> Option<ObjectRecord> {
        let pos = self.index.remove(id)?;
        let removed = self.records.remove(pos);
        for record in &self.records[pos..] {
            if let Some(slot) = self.index.get_mut(&record.id) {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ObjectRecord> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains_key(id)
    }

    /// All records in store order
    pub fn snapshot(&self) -> Vec<ObjectRecord> {
        self.records.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::{PhysicsParams, Transform};

    fn record(id: &str, x: f32) -> ObjectRecord {
        ObjectRecord {
            id: ObjectId::new(id),
            display_name: id.to_uppercase(),
            model_reference: format!("model_{}", id),
            description_text: String::new(),
            transform: Transform::from_translation(x, 0.0, 0.0),
            animation_references: Vec::new(),
            physics: PhysicsParams::STATIC,
        }
    }

    fn ids(store: &ObjectStore) -> Vec<String> {
        store.iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn test_upsert_inserts_in_order() {
        let mut store = ObjectStore::new();
        assert!(store.upsert(record("a", 0.0)).is_none());
        assert!(store.upsert(record("b", 0.0)).is_none());
        assert!(store.upsert(record("c", 0.0)).is_none());
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut store = ObjectStore::new();
        store.upsert(record("a", 0.0));
        store.upsert(record("b", 0.0));

        let previous = store.upsert(record("a", 5.0)).unwrap();
        assert_eq!(previous.transform.translation()[0], 0.0);
        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(
            store.get(&ObjectId::new("a")).unwrap().transform.translation()[0],
            5.0
        );
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut once = ObjectStore::new();
        once.upsert(record("a", 1.0));

        let mut twice = ObjectStore::new();
        twice.upsert(record("a", 1.0));
        twice.upsert(record("a", 1.0));

        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn test_remove_reindexes() {
        let mut store = ObjectStore::new();
        store.upsert(record("a", 0.0));
        store.upsert(record("b", 0.0));
        store.upsert(record("c", 0.0));

        assert!(store.remove(&ObjectId::new("a")).is_some());
        assert_eq!(ids(&store), vec!["b", "c"]);

        // Later records are still reachable after the shift
        assert!(store.get(&ObjectId::new("c")).is_some());
        store.upsert(record("c", 9.0));
        assert_eq!(ids(&store), vec!["b", "c"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut store = ObjectStore::new();
        store.upsert(record("a", 0.0));
        assert!(store.remove(&ObjectId::new("zzz")).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut store = ObjectStore::new();
        store.upsert(record("a", 0.0));
        store.clear();
        assert!(store.is_empty());
        assert!(!store.contains(&ObjectId::new("a")));
        assert!(store.snapshot().is_empty());
    }
}
