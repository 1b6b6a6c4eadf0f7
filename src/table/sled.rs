use crate::table::Table;
use anyhow::Result;
use tempfile::TempDir;

pub struct Sled {
    db: sled::Db,
    _f: TempDir,
}

impl Sled {
    pub fn new() -> Result<Self> {
        let f = TempDir::new()?;
        let db = sled::open(f.path())?;
        Ok(Sled { db, _f: f })
    }
}

impl Table for Sled {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        // swapping from "absent" only succeeds for a fresh key
        let swapped = self.db.compare_and_swap(key, None::<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let prev = self
            .db
            .fetch_and_update(key, |old| old.map(|_| value.to_vec()))?;
        Ok(prev.is_some())
    }

    fn erase(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.remove(key)?.is_some())
    }
}
