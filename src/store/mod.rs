//! Document store
//!
//! Fjall-backed persistence for the domain entities, one partition per
//! collection with JSON values. Multi-document atomicity uses fjall write
//! batches; read-modify-write sequences serialize on a process-wide write
//! lock and bump each document's `revision` stamp.

pub mod error;
pub mod keys;
pub mod pruning;
mod repos;

pub use error::{Result, StoreError};
pub use pruning::PruneStats;
pub use repos::JobFilter;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

/// Persistent store for all §3 collections.
#[derive(Clone)]
pub struct CoreStore {
    keyspace: Keyspace,
    pub(crate) users: PartitionHandle,
    pub(crate) cvs: PartitionHandle,
    pub(crate) versions: PartitionHandle,
    pub(crate) jobs: PartitionHandle,
    pub(crate) generations: PartitionHandle,
    pub(crate) analyses: PartitionHandle,
    pub(crate) parsing_jobs: PartitionHandle,
    pub(crate) webhooks: PartitionHandle,
    pub(crate) deliveries: PartitionHandle,
    pub(crate) indexes: PartitionHandle,
    pub(crate) meta: PartitionHandle,
    write_lock: Arc<Mutex<()>>,
}

impl CoreStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening document store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let open = |name: &str| -> Result<PartitionHandle> {
            Ok(keyspace.open_partition(name, PartitionCreateOptions::default())?)
        };

        let store = Self {
            users: open("users")?,
            cvs: open("cvs")?,
            versions: open("versions")?,
            jobs: open("jobs")?,
            generations: open("generations")?,
            analyses: open("analyses")?,
            parsing_jobs: open("parsing_jobs")?,
            webhooks: open("webhooks")?,
            deliveries: open("deliveries")?,
            indexes: open("indexes")?,
            meta: open("meta")?,
            keyspace,
            write_lock: Arc::new(Mutex::new(())),
        };

        info!("Document store opened");
        Ok(store)
    }

    /// Persist all pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Start a write batch for a multi-document transaction.
    pub fn batch(&self) -> Batch {
        self.keyspace.batch()
    }

    /// Hold the write lock across a read-modify-write sequence.
    ///
    /// Fjall writes are atomic per key; this lock is what makes compound
    /// operations (version activation, job + companion terminal writes)
    /// behave like single-writer transactions inside one process.
    pub fn with_write_lock<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let _guard = self.lock();
        f(self)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-write;
        // the underlying fjall batch either committed or it did not.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Generic JSON document helpers

    pub(crate) fn get_doc<T: DeserializeOwned>(
        partition: &PartitionHandle,
        key: &[u8],
    ) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put_doc<T: Serialize>(
        partition: &PartitionHandle,
        key: &[u8],
        doc: &T,
    ) -> Result<()> {
        let value = serde_json::to_vec(doc)?;
        partition.insert(key, value)?;
        Ok(())
    }

    pub(crate) fn stage_doc<T: Serialize>(
        batch: &mut Batch,
        partition: &PartitionHandle,
        key: &[u8],
        doc: &T,
    ) -> Result<()> {
        let value = serde_json::to_vec(doc)?;
        batch.insert(partition, key, value);
        Ok(())
    }

    /// Scan a whole partition, deserializing every document.
    pub(crate) fn scan_docs<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        for item in partition.iter() {
            let (_, value) = item?;
            docs.push(serde_json::from_slice(&value)?);
        }
        Ok(docs)
    }

    pub(crate) fn update_doc<T, F>(
        &self,
        partition: &PartitionHandle,
        collection: &'static str,
        id: &str,
        apply: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let _guard = self.lock();
        let mut doc: T = Self::get_doc(partition, id.as_bytes())?.ok_or_else(|| {
            StoreError::NotFound {
                collection,
                id: id.to_string(),
            }
        })?;
        apply(&mut doc);
        Self::put_doc(partition, id.as_bytes(), &doc)?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = CoreStore::open(temp_dir.path().join("docs"));
        assert!(store.is_ok());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docs");

        {
            let store = CoreStore::open(&path).unwrap();
            CoreStore::put_doc(&store.meta, b"meta:test", &serde_json::json!({"v": 1})).unwrap();
            store.persist().unwrap();
        }

        let store = CoreStore::open(&path).unwrap();
        let value: Option<serde_json::Value> =
            CoreStore::get_doc(&store.meta, b"meta:test").unwrap();
        assert_eq!(value.unwrap()["v"], 1);
    }
}
