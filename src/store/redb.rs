//! On-disk store backed by redb.
//!
//! ```yaml
//! store:
//!   backend: redb
//!   path: "/data/lookalike_vectors.redb"
//! ```

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{StoredRow, VectorBackend};
use crate::StoreError;

/// `entity_id -> raw little-endian f32 blob`.
const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");

/// Persistent backend. Every `put`/`delete` is its own committed write
/// transaction, so a row is either fully written or untouched.
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Opens or creates the database file. The table is created by
    /// [`VectorBackend::init`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }
        let db = Database::create(path).map_err(StoreError::backend)?;
        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VectorBackend for RedbBackend {
    fn init(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            // Opening a table in a write transaction creates it.
            let _table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
        }
        write_txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn put(&self, entity_id: &str, raw: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
            table.insert(entity_id, raw).map_err(StoreError::backend)?;
        }
        write_txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn delete(&self, entity_id: &str) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
            table.remove(entity_id).map_err(StoreError::backend)?;
        }
        write_txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(StoredRow<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(StoreError::backend)?;

        for item in table.iter().map_err(StoreError::backend)? {
            let (key, value) = item.map_err(StoreError::backend)?;
            visitor(StoredRow {
                entity_id: key.value(),
                raw: value.value(),
            })?;
        }
        Ok(())
    }
}
