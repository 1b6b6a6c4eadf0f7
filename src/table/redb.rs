use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tempfile::NamedTempFile;

static TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

pub struct Redb {
    _f: NamedTempFile,
    db: Database,
}

impl Redb {
    pub fn new() -> Result<Self> {
        let f = NamedTempFile::new()?;
        let db = Database::create(f.path())?;
        Ok(Redb { _f: f, db })
    }
}

impl crate::table::Table for Redb {
    fn init(&self) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let _ = tx.open_table(TABLE)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let inserted = {
            let mut t = tx.open_table(TABLE)?;
            let present = t.get(key)?.is_some();
            if !present {
                t.insert(key, value)?;
            }
            !present
        };
        tx.commit()?;
        Ok(inserted)
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read()?;
        let t = tx.open_table(TABLE)?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let updated = {
            let mut t = tx.open_table(TABLE)?;
            let present = t.get(key)?.is_some();
            if present {
                t.insert(key, value)?;
            }
            present
        };
        tx.commit()?;
        Ok(updated)
    }

    fn erase(&self, key: &[u8]) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let erased = {
            let mut t = tx.open_table(TABLE)?;
            t.remove(key)?.is_some()
        };
        tx.commit()?;
        Ok(erased)
    }
}
