//! # File Key Store
//!
//! Master secrets persisted as one bincode image. Every read and write of
//! the file happens under an exclusive `fs2` lock so that processes
//! sharing the file never observe a half-written image.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bus_types::{BusError, BusResult, Guid128};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::{AccessRights, KeyBlob};
use crate::ports::KeyStore;

#[derive(Serialize, Deserialize)]
struct StoreImage {
    guid: Guid128,
    keys: Vec<(Guid128, KeyBlob, AccessRights)>,
}

pub struct FileKeyStore {
    path: PathBuf,
    guid: Guid128,
    shared: bool,
    keys: RwLock<HashMap<Guid128, (KeyBlob, AccessRights)>>,
}

fn io_error(e: std::io::Error) -> BusError {
    BusError::KeyStore(e.to_string())
}

fn open_locked(path: &Path) -> BusResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_error)?;
    file.lock_exclusive().map_err(io_error)?;
    Ok(file)
}

fn read_image(file: &mut File) -> BusResult<Option<StoreImage>> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(io_error)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|e| BusError::KeyStore(format!("corrupt key store: {e}")))
}

impl FileKeyStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::KeyStore` if the file cannot be read or is corrupt.
    pub fn open(path: impl Into<PathBuf>, shared: bool) -> BusResult<Self> {
        let path = path.into();
        let mut file = open_locked(&path)?;
        let image = read_image(&mut file)?;
        let _ = file.unlock();

        let (guid, keys) = match image {
            Some(image) => (
                image.guid,
                image.keys.into_iter().map(|(g, b, r)| (g, (b, r))).collect(),
            ),
            None => (Guid128::generate(), HashMap::new()),
        };
        tracing::debug!(path = %path.display(), keys = keys.len(), "key store opened");
        let store = Self {
            path,
            guid,
            shared,
            keys: RwLock::new(keys),
        };
        store.store()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn guid(&self) -> Guid128 {
        self.guid
    }

    fn get_key(&self, guid: &Guid128) -> BusResult<(KeyBlob, AccessRights)> {
        self.keys.read().get(guid).cloned().ok_or(BusError::KeyUnavailable)
    }

    fn has_key(&self, guid: &Guid128) -> bool {
        self.keys.read().contains_key(guid)
    }

    fn add_key(&self, guid: &Guid128, blob: KeyBlob, rights: AccessRights) -> BusResult<()> {
        self.keys.write().insert(*guid, (blob, rights));
        Ok(())
    }

    fn del_key(&self, guid: &Guid128) -> BusResult<()> {
        self.keys
            .write()
            .remove(guid)
            .map(|_| ())
            .ok_or(BusError::KeyUnavailable)
    }

    fn set_key_expiration(&self, guid: &Guid128, expires_at_ms: u64) -> BusResult<()> {
        let mut keys = self.keys.write();
        let (blob, _) = keys.get_mut(guid).ok_or(BusError::KeyUnavailable)?;
        blob.set_expiration_at(expires_at_ms);
        Ok(())
    }

    fn reload(&self) -> BusResult<()> {
        let mut file = open_locked(&self.path)?;
        let image = read_image(&mut file)?;
        let _ = file.unlock();
        if let Some(image) = image {
            *self.keys.write() = image.keys.into_iter().map(|(g, b, r)| (g, (b, r))).collect();
        }
        Ok(())
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn store(&self) -> BusResult<()> {
        let image = {
            let mut keys = self.keys.write();
            keys.retain(|_, (blob, _)| !blob.has_expired());
            StoreImage {
                guid: self.guid,
                keys: keys
                    .iter()
                    .map(|(g, (b, r))| (*g, b.clone(), *r))
                    .collect(),
            }
        };
        let bytes = bincode::serialize(&image).map_err(|e| BusError::KeyStore(e.to_string()))?;

        let mut file = open_locked(&self.path)?;
        let result = (|| {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&bytes)?;
            file.sync_all()
        })();
        let _ = file.unlock();
        result.map_err(io_error)
    }

    fn clear(&self) {
        self.keys.write().clear();
    }
}
