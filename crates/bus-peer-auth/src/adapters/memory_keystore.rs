//! In-memory key store.
//!
//! Several stores can share one [`SharedKeyBacking`] to stand in for
//! processes sharing a key store file: `store` publishes local changes,
//! `reload` picks up everybody else's, and on conflict the most recently
//! written key wins.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bus_types::{BusError, BusResult, Guid128};
use parking_lot::{Mutex, RwLock};

use crate::domain::{AccessRights, KeyBlob};
use crate::ports::KeyStore;

static REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    REVISION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone)]
struct Entry {
    blob: KeyBlob,
    rights: AccessRights,
    revision: u64,
}

/// Storage shared by several [`MemoryKeyStore`]s.
#[derive(Default)]
pub struct SharedKeyBacking {
    entries: Mutex<HashMap<Guid128, Entry>>,
}

impl SharedKeyBacking {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryKeyStore {
    guid: Guid128,
    keys: RwLock<HashMap<Guid128, Entry>>,
    deleted: Mutex<HashSet<Guid128>>,
    backing: Option<Arc<SharedKeyBacking>>,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyStore {
    /// Private store with a fresh GUID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            guid: Guid128::generate(),
            keys: RwLock::new(HashMap::new()),
            deleted: Mutex::new(HashSet::new()),
            backing: None,
        }
    }

    /// Store sharing `backing` with other stores.
    #[must_use]
    pub fn shared(backing: Arc<SharedKeyBacking>) -> Self {
        Self {
            backing: Some(backing),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn guid(&self) -> Guid128 {
        self.guid
    }

    fn get_key(&self, guid: &Guid128) -> BusResult<(KeyBlob, AccessRights)> {
        self.keys
            .read()
            .get(guid)
            .map(|e| (e.blob.clone(), e.rights))
            .ok_or(BusError::KeyUnavailable)
    }

    fn has_key(&self, guid: &Guid128) -> bool {
        self.keys.read().contains_key(guid)
    }

    fn add_key(&self, guid: &Guid128, blob: KeyBlob, rights: AccessRights) -> BusResult<()> {
        self.deleted.lock().remove(guid);
        self.keys.write().insert(
            *guid,
            Entry {
                blob,
                rights,
                revision: next_revision(),
            },
        );
        Ok(())
    }

    fn del_key(&self, guid: &Guid128) -> BusResult<()> {
        self.keys
            .write()
            .remove(guid)
            .ok_or(BusError::KeyUnavailable)?;
        self.deleted.lock().insert(*guid);
        Ok(())
    }

    fn set_key_expiration(&self, guid: &Guid128, expires_at_ms: u64) -> BusResult<()> {
        let mut keys = self.keys.write();
        let entry = keys.get_mut(guid).ok_or(BusError::KeyUnavailable)?;
        entry.blob.set_expiration_at(expires_at_ms);
        entry.revision = next_revision();
        Ok(())
    }

    fn reload(&self) -> BusResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let shared = backing.entries.lock();
        let deleted = self.deleted.lock();
        let mut keys = self.keys.write();
        for (guid, entry) in shared.iter() {
            if deleted.contains(guid) {
                continue;
            }
            let newer = keys.get(guid).map_or(true, |local| entry.revision > local.revision);
            if newer {
                keys.insert(*guid, entry.clone());
            }
        }
        Ok(())
    }

    fn is_shared(&self) -> bool {
        self.backing.is_some()
    }

    fn store(&self) -> BusResult<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let mut shared = backing.entries.lock();
        for guid in self.deleted.lock().drain() {
            shared.remove(&guid);
        }
        for (guid, entry) in self.keys.read().iter() {
            if entry.blob.has_expired() {
                continue;
            }
            let newer = shared.get(guid).map_or(true, |theirs| entry.revision > theirs.revision);
            if newer {
                shared.insert(*guid, entry.clone());
            }
        }
        Ok(())
    }

    fn clear(&self) {
        let dropped: Vec<Guid128> = self.keys.write().drain().map(|(guid, _)| guid).collect();
        self.deleted.lock().extend(dropped);
    }
}
