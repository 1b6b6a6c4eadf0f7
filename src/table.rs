mod dash_map;
mod mem_btree;
mod redb;
mod sled;

use crate::TableType;
use crate::table::dash_map::DashTable;
use crate::table::mem_btree::MemBTree;
use crate::table::redb::Redb;
use crate::table::sled::Sled;
use anyhow::Result;
use std::sync::Arc;

/// Key-value table under test. All methods may be called concurrently from
/// several threads as long as the threads use disjoint keys.
pub trait Table: Send + Sync {
    fn init(&self) -> Result<()>;
    /// Insert `key` if it is absent. Returns false, without overwriting, if
    /// the key is already present.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool>;
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Overwrite the value of an existing key. Returns false if the key is absent.
    fn update(&self, key: &[u8], value: &[u8]) -> Result<bool>;
    /// Remove `key`. Returns false if the key is absent.
    fn erase(&self, key: &[u8]) -> Result<bool>;
}

pub fn get_table(table: TableType, initial_capacity: u64) -> Result<Arc<dyn Table>> {
    match table {
        TableType::DashMap => Ok(Arc::new(DashTable::with_capacity(initial_capacity))),
        TableType::MemBtree => Ok(Arc::new(MemBTree::default())),
        TableType::Redb => Ok(Arc::new(Redb::new()?)),
        TableType::Sled => Ok(Arc::new(Sled::new()?)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Walks a table through the insert/read/update/erase contract.
    pub(crate) fn check_contract(t: &dyn Table) {
        t.init().unwrap();
        assert_eq!(t.read(b"k1").unwrap(), None);
        assert!(!t.update(b"k1", b"v0").unwrap());
        assert!(!t.erase(b"k1").unwrap());

        assert!(t.insert(b"k1", b"v1").unwrap());
        assert!(!t.insert(b"k1", b"v2").unwrap());
        assert_eq!(t.read(b"k1").unwrap().as_deref(), Some(&b"v1"[..]));

        assert!(t.update(b"k1", b"v3").unwrap());
        assert_eq!(t.read(b"k1").unwrap().as_deref(), Some(&b"v3"[..]));

        assert!(t.erase(b"k1").unwrap());
        assert!(!t.erase(b"k1").unwrap());
        assert_eq!(t.read(b"k1").unwrap(), None);
    }

    #[test]
    fn every_table_type_honours_contract() {
        for tt in [
            TableType::DashMap,
            TableType::MemBtree,
            TableType::Redb,
            TableType::Sled,
        ] {
            let t = get_table(tt, 16).unwrap();
            check_contract(t.as_ref());
        }
    }
}
