use crate::table::Table;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemBTree {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Table for MemBTree {
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        match data.entry(Vec::from(key)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(e) => {
                e.insert(Vec::from(value));
                Ok(true)
            }
        }
    }

    fn read(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn update(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        match data.get_mut(key) {
            Some(v) => {
                *v = Vec::from(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn erase(&self, key: &[u8]) -> anyhow::Result<bool> {
        Ok(self
            .data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some())
    }
}
