//! Lumen Photos - Secure Key Cache
//!
//! Holds unwrapped master and album keys for the lifetime of one session.
//! Memory only. Every mutation happens under a single mutex.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lumen_keyvault::KeyHandle;
use parking_lot::Mutex;

use crate::error::{VaultError, VaultResult};

/// One cached key
struct CacheEntry {
    key: KeyHandle,
    cached_at: DateTime<Utc>,
}

struct SessionState {
    entries: HashMap<String, CacheEntry>,
    /// Bumped on every clear; in-flight work compares against it
    epoch: u64,
    locked: bool,
}

/// Session-scoped key cache, shared as `Arc<KeySession>`
pub struct KeySession {
    state: Mutex<SessionState>,
}

impl Default for KeySession {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySession {
    /// Fresh, unlocked, empty session
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                entries: HashMap::new(),
                epoch: 0,
                locked: false,
            }),
        }
    }

    /// Insert or replace. A replaced key is wiped. Refused while locked;
    /// only [`KeySession::unlock_with`] reopens the session.
    pub fn put(&self, id: &str, key: KeyHandle) -> VaultResult<()> {
        let mut state = self.state.lock();
        if state.locked {
            let mut key = key;
            key.wipe();
            return Err(VaultError::SessionLocked);
        }
        Self::insert(&mut state, id, key);
        Ok(())
    }

    /// Insert only if no clear happened since `epoch` was read
    pub fn put_if_current(&self, id: &str, key: KeyHandle, epoch: u64) -> VaultResult<()> {
        let mut state = self.state.lock();
        if state.locked || state.epoch != epoch {
            let mut key = key;
            key.wipe();
            return Err(VaultError::SessionLocked);
        }
        Self::insert(&mut state, id, key);
        Ok(())
    }

    /// Cache the key and reopen the session in one step
    pub fn unlock_with(&self, id: &str, key: KeyHandle) {
        let mut state = self.state.lock();
        Self::insert(&mut state, id, key);
        state.locked = false;
    }

    fn insert(state: &mut SessionState, id: &str, key: KeyHandle) {
        let entry = CacheEntry {
            key,
            cached_at: Utc::now(),
        };
        if let Some(mut old) = state.entries.insert(id.to_string(), entry) {
            old.key.wipe();
        }
    }

    pub fn get(&self, id: &str) -> Option<KeyHandle> {
        self.state.lock().entries.get(id).map(|entry| entry.key.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// When `id` was cached
    pub fn cached_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().entries.get(id).map(|entry| entry.cached_at)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Open and not cleared since `epoch` was read
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        !state.locked && state.epoch == epoch
    }

    /// Wipe every key, bump the epoch and mark the session locked
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        for (_, mut entry) in state.entries.drain() {
            entry.key.wipe();
        }
        state.epoch = state.epoch.wrapping_add(1);
        state.locked = true;
        tracing::debug!(count, epoch = state.epoch, "key cache cleared");
    }
}
