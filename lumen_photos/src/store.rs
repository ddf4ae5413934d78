//! Lumen Photos - Document store and identity collaborators
//!
//! The vault never talks to a backend directly. It reads and merge-upserts
//! JSON documents through [`DocumentStore`] and asks [`IdentityProvider`]
//! who is signed in.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{VaultError, VaultResult};

/// Generic document get / merge-upsert
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `Ok(None)` if it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> VaultResult<Option<Value>>;

    /// Write a document. With `merge` set, object fields are merged
    /// recursively into any existing document instead of replacing it.
    async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool) -> VaultResult<()>;
}

/// Source of the currently authenticated principal
pub trait IdentityProvider: Send + Sync {
    fn current_principal_id(&self) -> Option<String>;
}

/// Merge `patch` into `target`: objects merge key by key, anything else replaces.
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Bound a store call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> VaultResult<T>
where
    F: Future<Output = VaultResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(VaultError::Timeout(what.to_string())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Process-local store, used by tests and embedders without a backend
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for inspection in tests and tooling
    pub fn snapshot(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs
            .read()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> VaultResult<Option<Value>> {
        Ok(self.snapshot(collection, id))
    }

    async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool) -> VaultResult<()> {
        let mut docs = self.docs.write();
        let key = (collection.to_string(), id.to_string());
        match docs.get_mut(&key) {
            Some(existing) if merge => merge_json(existing, data),
            _ => {
                docs.insert(key, data);
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATIC IDENTITY
// ═══════════════════════════════════════════════════════════════════════════

/// Identity set explicitly by the embedder (CLI flag, test, login callback)
#[derive(Default)]
pub struct StaticIdentity {
    principal: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn signed_in(principal_id: impl Into<String>) -> Self {
        Self {
            principal: RwLock::new(Some(principal_id.into())),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, principal_id: impl Into<String>) {
        *self.principal.write() = Some(principal_id.into());
    }

    pub fn sign_out(&self) {
        *self.principal.write() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal_id(&self) -> Option<String> {
        self.principal.read().clone()
    }
}
