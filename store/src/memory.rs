use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;

use crate::Store;

/// A store living in memory, fulfilling the [`Store`] trait.
///
/// Backs the unit and integration tests and the host-simulation handler.
/// Nothing survives a restart, so it is never used inside the enclave.
#[derive(Debug, Default)]
pub struct MemoryStore(RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>);

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore(RwLock::new(HashMap::new()))
    }
}

impl Store for MemoryStore {
    fn get(&self, column_family: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let cfs = self.0.read().unwrap();
        Ok(cfs
            .get(column_family)
            .and_then(|cf| cf.get(key))
            .cloned())
    }

    fn put(&self, column_family: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut cfs = self.0.write().unwrap();
        cfs.entry(column_family.to_string())
            .or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column_family: &str, key: &str) -> Result<()> {
        let mut cfs = self.0.write().unwrap();
        if let Some(cf) = cfs.get_mut(column_family) {
            cf.remove(key);
        }
        Ok(())
    }

    fn get_keys(&self, column_family: &str, prefix: &str) -> Result<Vec<String>> {
        let cfs = self.0.read().unwrap();
        let keys = match cfs.get(column_family) {
            Some(cf) => cf
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_put_stored() {
        let store = MemoryStore::new();
        assert_eq!(store.get("cf", "k").unwrap(), None);

        store.put("cf", "k", b"value").unwrap();
        assert_eq!(store.get("cf", "k").unwrap(), Some(b"value".to_vec()));

        store.put("cf", "k", b"overwritten").unwrap();
        assert_eq!(store.get("cf", "k").unwrap(), Some(b"overwritten".to_vec()));
    }

    #[test]
    fn column_families_are_isolated() {
        let store = MemoryStore::new();
        store.put("a", "k", b"1").unwrap();
        store.put("b", "k", b"2").unwrap();
        assert_eq!(store.get("a", "k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("b", "k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_is_a_noop_on_absent_keys() {
        let store = MemoryStore::new();
        store.delete("cf", "missing").unwrap();

        store.put("cf", "k", b"v").unwrap();
        store.delete("cf", "k").unwrap();
        assert_eq!(store.get("cf", "k").unwrap(), None);
        store.delete("cf", "k").unwrap();
    }

    #[test]
    fn get_keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store.put("cf", "./db1/a.frm", b"").unwrap();
        store.put("cf", "./db1/b.frm", b"").unwrap();
        store.put("cf", "./db2/c.frm", b"").unwrap();

        let keys = store.get_keys("cf", "./db1/").unwrap();
        assert_eq!(keys, vec!["./db1/a.frm", "./db1/b.frm"]);
        assert!(store.get_keys("cf", "./db3/").unwrap().is_empty());
        assert!(store.get_keys("other", "./").unwrap().is_empty());
    }
}
