//! Durable bundle store
//!
//! Canonical owner of every bundle record, keyed by local id. Two
//! backends: a sled tree plus a payload file directory, or a purely
//! in-memory map for tests and diskless nodes. Records are bincode;
//! nothing here ever touches the wire format.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

use crate::bundle::{Bundle, Payload};
use crate::types::BundleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    MemoryDb,
    FilesysDb,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memorydb" => Ok(StorageType::MemoryDb),
            "filesysdb" => Ok(StorageType::FilesysDb),
            other => Err(format!("unknown storage type: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend: {0}")]
    Backend(#[from] sled::Error),
    #[error("record encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

enum Backend {
    Memory(RwLock<BTreeMap<BundleId, Vec<u8>>>),
    Sled(sled::Db),
}

pub struct BundleStore {
    backend: Backend,
    payload_dir: Option<PathBuf>,
}

impl BundleStore {
    pub fn open_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(BTreeMap::new())),
            payload_dir: None,
        }
    }

    pub fn open_filesys(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let payload_dir = data_dir.join("payloads");
        std::fs::create_dir_all(&payload_dir)?;
        let db = sled::open(data_dir.join("bundles.db"))?;
        info!(dir = %data_dir.display(), "opened bundle store");
        Ok(Self {
            backend: Backend::Sled(db),
            payload_dir: Some(payload_dir),
        })
    }

    pub fn open(storage: StorageType, data_dir: &Path) -> Result<Self, StoreError> {
        match storage {
            StorageType::MemoryDb => Ok(Self::open_memory()),
            StorageType::FilesysDb => Self::open_filesys(data_dir),
        }
    }

    /// Fresh payload storage for a bundle about to be received,
    /// in memory or a file named by the bundle id.
    pub fn create_payload(&self, id: BundleId) -> std::io::Result<Payload> {
        match &self.payload_dir {
            None => Ok(Payload::in_memory(Vec::new())),
            Some(dir) => Payload::on_disk(dir.join(format!("{}.payload", id))),
        }
    }

    pub fn put(&self, bundle: &Bundle) -> Result<(), StoreError> {
        let data = bincode::serialize(bundle)?;
        match &self.backend {
            Backend::Memory(map) => {
                map.write().expect("store lock").insert(bundle.id, data);
            }
            Backend::Sled(db) => {
                db.insert(bundle.id.to_be_bytes(), data)?;
                db.flush()?;
            }
        }
        Ok(())
    }

    pub fn get(&self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        let data = match &self.backend {
            Backend::Memory(map) => map.read().expect("store lock").get(&id).cloned(),
            Backend::Sled(db) => db.get(id.to_be_bytes())?.map(|v| v.to_vec()),
        };
        match data {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete the record and its payload file.
    pub fn del(&self, id: BundleId) -> Result<(), StoreError> {
        if let Some(bundle) = self.get(id)? {
            bundle.payload.remove_backing()?;
        }
        match &self.backend {
            Backend::Memory(map) => {
                map.write().expect("store lock").remove(&id);
            }
            Backend::Sled(db) => {
                db.remove(id.to_be_bytes())?;
                db.flush()?;
            }
        }
        debug!(bundle_id = id, "deleted bundle record");
        Ok(())
    }

    /// All stored bundle ids, ascending.
    pub fn iterate(&self) -> Result<Vec<BundleId>, StoreError> {
        match &self.backend {
            Backend::Memory(map) => {
                Ok(map.read().expect("store lock").keys().copied().collect())
            }
            Backend::Sled(db) => {
                let mut ids = Vec::new();
                for item in db.iter() {
                    let (key, _) = item?;
                    if key.len() == 4 {
                        ids.push(BundleId::from_be_bytes([key[0], key[1], key[2], key[3]]));
                    }
                }
                Ok(ids)
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Memory(map) => map.read().expect("store lock").len(),
            Backend::Sled(db) => db.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::EndpointId;

    fn sample() -> Bundle {
        let mut b = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            60,
        );
        b.payload = Payload::in_memory(b"stored bytes".to_vec());
        b
    }

    #[test]
    fn memory_put_get_del() {
        let store = BundleStore::open_memory();
        let b = sample();
        store.put(&b).unwrap();

        let got = store.get(b.id).unwrap().unwrap();
        assert_eq!(got.source, b.source);
        assert_eq!(got.payload.read_all().unwrap(), b"stored bytes");

        assert_eq!(store.iterate().unwrap(), vec![b.id]);
        store.del(b.id).unwrap();
        assert!(store.get(b.id).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn filesys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BundleStore::open_filesys(dir.path()).unwrap();

        let mut b = sample();
        b.payload = store.create_payload(b.id).unwrap();
        b.payload.append(b"on disk").unwrap();
        store.put(&b).unwrap();

        let got = store.get(b.id).unwrap().unwrap();
        assert_eq!(got.payload.read_all().unwrap(), b"on disk");

        store.del(b.id).unwrap();
        assert!(store.get(b.id).unwrap().is_none());
        // Payload file is gone too.
        assert!(!dir
            .path()
            .join("payloads")
            .join(format!("{}.payload", b.id))
            .exists());
    }
}
