//! Authoritative store of per-peer state.
//!
//! One [`PeerRecord`] per SKI, created on first mention and kept after the
//! peer disconnects.  Callers never see the raw map: they get a
//! [`PeerHandle`] (a shared, individually locked record) or point-in-time
//! copies.
//!
//! # Locks
//!
//! - the peer map (`RwLock<HashMap<..>>`),
//! - the global use-case enablement table (`RwLock<BTreeMap<..>>`),
//! - one `Mutex` per record,
//! - `global_writes`, which serializes changes to the global table together
//!   with their application to the records.
//!
//! The map and the table are never held while taking another lock.  The
//! only nesting is under `global_writes`, which may take the map, the table
//! or one record at a time; nothing takes `global_writes` while holding any
//! of those.
//!
//! All of them are `std::sync` locks; nothing awaits while holding one.
//! Poisoned locks are recovered, since every critical section leaves the
//! data consistent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use hems_core::{PeerId, PeerRecord};
use tracing::debug;

/// Shared handle to one peer's record.
pub type PeerHandle = Arc<Mutex<PeerRecord>>;

/// Locks a record handle, recovering from poisoning.
pub fn lock_record(handle: &PeerHandle) -> MutexGuard<'_, PeerRecord> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent map of SKI → record plus the process-wide enablement table.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerHandle>>,
    globals: RwLock<BTreeMap<String, bool>>,
    global_writes: Mutex<()>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose global table already knows `usecases`.
    pub fn with_usecases<I, S>(usecases: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let globals = usecases.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            peers: RwLock::default(),
            globals: RwLock::new(globals),
            global_writes: Mutex::default(),
        }
    }

    /// Returns the record for `id`, creating it if needed.
    ///
    /// An existing record only gets its `last_seen` refreshed.  A new record
    /// is seeded from the global enablement table.  Concurrent callers for
    /// the same `id` all receive the same handle.
    pub fn get_or_create(&self, id: &PeerId) -> PeerHandle {
        if let Some(handle) = self.get(id) {
            lock_record(&handle).touch();
            return handle;
        }

        let seed = self.globals();
        let (handle, created) = {
            let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            match peers.get(id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let handle = Arc::new(Mutex::new(PeerRecord::new(id.clone(), &seed)));
                    peers.insert(id.clone(), Arc::clone(&handle));
                    (handle, true)
                }
            }
        };

        if created {
            debug!("registered peer {id}");
            // A global change may have landed between reading `seed` and the
            // insert; it would have missed this record.
            let _writes = self.lock_global_writes();
            let current = self.globals();
            if current != seed {
                let mut rec = lock_record(&handle);
                for (name, enabled) in &current {
                    if seed.get(name) != Some(enabled) {
                        rec.set_support(name, *enabled);
                    }
                }
            }
        } else {
            lock_record(&handle).touch();
        }
        handle
    }

    /// Non-creating lookup.
    pub fn get(&self, id: &PeerId) -> Option<PeerHandle> {
        self.read_peers().get(id).cloned()
    }

    /// Deletes the record and returns its final state.  Does not notify
    /// anybody.
    pub fn remove(&self, id: &PeerId) -> Option<PeerRecord> {
        let handle = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        let rec = lock_record(&handle).clone();
        Some(rec)
    }

    /// Point-in-time copies of every record, ordered by SKI.
    pub fn all(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self
            .handles()
            .iter()
            .map(|h| lock_record(h).clone())
            .collect();
        records.sort_by(|a, b| a.ski().cmp(b.ski()));
        records
    }

    /// Currently registered SKIs.
    pub fn ids(&self) -> Vec<PeerId> {
        self.read_peers().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the global use-case enablement table.
    pub fn globals(&self) -> BTreeMap<String, bool> {
        self.globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the global enablement of `usecase` and applies it to every
    /// existing record.  Returns `true` if the global table changed.
    ///
    /// Writing the value the table already holds changes nothing, not even
    /// per-peer flags that differ from it.
    pub fn set_global(&self, usecase: &str, enabled: bool) -> bool {
        let _writes = self.lock_global_writes();
        let changed = {
            let mut globals = self.globals.write().unwrap_or_else(PoisonError::into_inner);
            globals.insert(usecase.to_string(), enabled) != Some(enabled)
        };
        if !changed {
            return false;
        }

        for handle in self.handles() {
            lock_record(&handle).set_support(usecase, enabled);
        }
        true
    }

    /// Sets one peer's support flag.  Returns `None` for an unknown peer,
    /// otherwise whether the flag changed.
    pub fn set_supported(&self, id: &PeerId, usecase: &str, supported: bool) -> Option<bool> {
        let handle = self.get(id)?;
        let changed = lock_record(&handle).set_support(usecase, supported);
        Some(changed)
    }

    fn lock_global_writes(&self) -> MutexGuard<'_, ()> {
        self.global_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handles(&self) -> Vec<PeerHandle> {
        self.read_peers().values().cloned().collect()
    }

    fn read_peers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PeerId, PeerHandle>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
