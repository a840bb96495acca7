//! Durable keyed storage for embedding blobs.
//!
//! Logically a single table `embeddings(entity_id TEXT PRIMARY KEY, vector BLOB NOT NULL)`.
//! Backends only move bytes; encoding lives in [`codec`](crate::codec) and
//! interpretation in the [`ranker`](crate::ranker).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::StoreError;

/// One scanned row, borrowed from the backend for the duration of the visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRow<'a> {
    pub entity_id: &'a str,
    pub raw: &'a [u8],
}

/// Row count and total blob bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: u64,
    pub total_bytes: u64,
}

/// Storage backend for the embeddings table. All methods block; callers run
/// them on the blocking pool.
pub trait VectorBackend: Send + Sync {
    /// Creates the table if it does not exist yet. Safe to call repeatedly.
    fn init(&self) -> Result<(), StoreError>;
    /// Inserts or replaces the blob for `entity_id`.
    fn put(&self, entity_id: &str, raw: &[u8]) -> Result<(), StoreError>;
    /// Removes `entity_id`. Absent ids are not an error.
    fn delete(&self, entity_id: &str) -> Result<(), StoreError>;
    /// Visits every row in key order. Returning an error from the visitor
    /// aborts the scan.
    fn scan(
        &self,
        visitor: &mut dyn FnMut(StoredRow<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
    /// Row count and total bytes, computed from a full scan unless the backend
    /// can do better.
    fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        self.scan(&mut |row| {
            stats.count += 1;
            stats.total_bytes += row.raw.len() as u64;
            Ok(())
        })?;
        Ok(stats)
    }
}

/// Selects and builds a backend.
///
/// ```
/// use lookalike::BackendConfig;
///
/// let memory = BackendConfig::in_memory();
/// let disk = BackendConfig::redb("/data/lookalike_vectors.redb");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// On-disk redb file. Requires the `embedded` feature.
    Redb { path: PathBuf },
    /// Process-local map, lost on exit.
    InMemory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Redb {
            path: PathBuf::from("lookalike_vectors.redb"),
        }
    }
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<PathBuf>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Opens the backend and ensures the schema exists.
    pub fn build(&self) -> Result<Box<dyn VectorBackend>, StoreError> {
        let backend: Box<dyn VectorBackend> = match self {
            BackendConfig::InMemory => Box::new(InMemoryBackend::new()),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "embedded")]
                {
                    Box::new(RedbBackend::open(path)?)
                }
                #[cfg(not(feature = "embedded"))]
                {
                    let _ = path;
                    return Err(StoreError::Unavailable(
                        "redb backend disabled at compile time".into(),
                    ));
                }
            }
        };
        backend.init()?;
        Ok(backend)
    }
}

/// `BTreeMap` behind a `RwLock`; scans in key order like the redb table.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for InMemoryBackend {
    fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn put(&self, entity_id: &str, raw: &[u8]) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .insert(entity_id.to_string(), raw.to_vec());
        Ok(())
    }

    fn delete(&self, entity_id: &str) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .remove(entity_id);
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(StoredRow<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        for (entity_id, raw) in guard.iter() {
            visitor(StoredRow { entity_id, raw })?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(StoreStats {
            count: guard.len() as u64,
            total_bytes: guard.values().map(|v| v.len() as u64).sum(),
        })
    }
}

#[cfg(feature = "embedded")]
pub mod redb;

#[cfg(feature = "embedded")]
pub use self::redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(backend: &dyn VectorBackend) -> Vec<(String, Vec<u8>)> {
        let mut rows = Vec::new();
        backend
            .scan(&mut |row| {
                rows.push((row.entity_id.to_string(), row.raw.to_vec()));
                Ok(())
            })
            .unwrap();
        rows
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let backend = InMemoryBackend::new();
        backend.put("car", &[1, 2, 3, 4]).unwrap();
        backend.put("car", &[5, 6, 7, 8]).unwrap();

        let rows = collect(&backend);
        assert_eq!(rows, vec![("car".to_string(), vec![5, 6, 7, 8])]);
    }

    #[test]
    fn delete_absent_is_noop() {
        let backend = InMemoryBackend::new();
        backend.put("keep", &[0; 4]).unwrap();
        backend.delete("missing").unwrap();
        assert_eq!(collect(&backend).len(), 1);
    }

    #[test]
    fn scan_is_key_ordered() {
        let backend = InMemoryBackend::new();
        for id in ["b", "c", "a"] {
            backend.put(id, &[0; 4]).unwrap();
        }
        let ids: Vec<String> = collect(&backend).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn visitor_error_aborts_scan() {
        let backend = InMemoryBackend::new();
        backend.put("a", &[0; 4]).unwrap();
        backend.put("b", &[0; 4]).unwrap();

        let mut seen = 0;
        let result = backend.scan(&mut |_| {
            seen += 1;
            Err(StoreError::backend("stop"))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn stats_count_rows_and_bytes() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.stats().unwrap(), StoreStats::default());
        backend.put("a", &[0; 8]).unwrap();
        backend.put("b", &[0; 4]).unwrap();
        assert_eq!(
            backend.stats().unwrap(),
            StoreStats {
                count: 2,
                total_bytes: 12
            }
        );
    }

    #[test]
    fn default_trait_stats_uses_scan() {
        struct ScanOnly(InMemoryBackend);
        impl VectorBackend for ScanOnly {
            fn init(&self) -> Result<(), StoreError> {
                Ok(())
            }
            fn put(&self, id: &str, raw: &[u8]) -> Result<(), StoreError> {
                self.0.put(id, raw)
            }
            fn delete(&self, id: &str) -> Result<(), StoreError> {
                self.0.delete(id)
            }
            fn scan(
                &self,
                visitor: &mut dyn FnMut(StoredRow<'_>) -> Result<(), StoreError>,
            ) -> Result<(), StoreError> {
                self.0.scan(visitor)
            }
        }

        let backend = ScanOnly(InMemoryBackend::new());
        backend.put("x", &[0; 12]).unwrap();
        assert_eq!(
            backend.stats().unwrap(),
            StoreStats {
                count: 1,
                total_bytes: 12
            }
        );
    }

    #[test]
    fn backend_config_serde() {
        let cfg: BackendConfig =
            serde_yaml::from_str("backend: redb\npath: /tmp/v.redb\n").unwrap();
        assert_eq!(cfg, BackendConfig::redb("/tmp/v.redb"));
        let cfg: BackendConfig = serde_yaml::from_str("backend: in_memory\n").unwrap();
        assert_eq!(cfg, BackendConfig::InMemory);
    }

    #[test]
    fn in_memory_config_builds() {
        let backend = BackendConfig::in_memory().build().unwrap();
        backend.put("a", &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.stats().unwrap().count, 1);
    }
}
