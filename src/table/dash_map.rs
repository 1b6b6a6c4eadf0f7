use crate::table::Table;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Sharded concurrent hash map, pre-sized to the benchmark's initial capacity
/// up to `MAX_PRESIZE` entries.
#[derive(Default)]
pub struct DashTable {
    map: DashMap<Vec<u8>, Vec<u8>>,
}

/// Largest number of entries reserved up front; bigger tables grow on demand.
const MAX_PRESIZE: u64 = 1 << 25;

fn presize(capacity: u64) -> usize {
    capacity.min(MAX_PRESIZE) as usize
}

impl DashTable {
    pub fn with_capacity(capacity: u64) -> Self {
        DashTable {
            map: DashMap::with_capacity(presize(capacity)),
        }
    }
}

impl Table for DashTable {
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        match self.map.entry(Vec::from(key)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(e) => {
                e.insert(Vec::from(value));
                Ok(true)
            }
        }
    }

    fn read(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    fn update(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        match self.map.get_mut(key) {
            Some(mut v) => {
                *v = Vec::from(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn erase(&self, key: &[u8]) -> anyhow::Result<bool> {
        Ok(self.map.remove(key).is_some())
    }
}
