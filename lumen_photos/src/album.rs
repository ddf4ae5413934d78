//! Lumen Photos - Album Key Manager
//!
//! One random AES-256 key per album, persisted under `albumKeys/<albumId>`
//! wrapped either by the master key or, before a master key exists, by a
//! key derived from the owner's principal id.

use std::collections::HashMap;
use std::sync::Arc;

use lumen_keyvault::{CipherSuite, KeyHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::KeySession;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::master::MasterKeyManager;
use crate::records::{KeyWrapping, SealedAlbumKey};
use crate::store::{with_timeout, DocumentStore, IdentityProvider};

/// Cache id of an album key
pub fn album_cache_id(album_id: &str) -> String {
    format!("album:{}", album_id)
}

fn album_aad(album_id: &str) -> Vec<u8> {
    format!("lumen:album-key:{}", album_id).into_bytes()
}

/// Album key manager
pub struct AlbumKeyManager {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    suite: Arc<dyn CipherSuite>,
    config: Arc<VaultConfig>,
    master: Arc<MasterKeyManager>,
    session: Arc<KeySession>,
    /// One gate per album with a resolve in flight
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AlbumKeyManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        suite: Arc<dyn CipherSuite>,
        config: Arc<VaultConfig>,
        master: Arc<MasterKeyManager>,
    ) -> Self {
        let session = Arc::clone(master.session());
        Self {
            store,
            identity,
            suite,
            config,
            master,
            session,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    /// Fresh random album key
    pub fn create_album_key(&self, album_id: &str) -> KeyHandle {
        debug!(album_id, "generating album key");
        self.suite.generate_key()
    }

    /// Seal under the master key if it is cached, otherwise under the
    /// identity-derived key when the fallback is permitted.
    pub async fn seal_album_key(&self, album_id: &str, key: &KeyHandle) -> VaultResult<SealedAlbumKey> {
        let aad = album_aad(album_id);

        if let Some((_, master)) = self.master.cached_master_key() {
            let sealed = self.suite.wrap_key(key, &master, &aad)?;
            return Ok(SealedAlbumKey::new(album_id, &sealed, KeyWrapping::MasterKey));
        }

        let kek = self.fallback_kek().await?;
        let sealed = self.suite.wrap_key(key, &kek, &aad)?;
        warn!(
            album_id,
            "album key sealed under identity-derived key; migrate once a passphrase is set"
        );
        Ok(SealedAlbumKey::new(album_id, &sealed, KeyWrapping::IdentityDerived))
    }

    /// Identity-derived KEK for sealing, only while no master key exists
    async fn fallback_kek(&self) -> VaultResult<KeyHandle> {
        if self.identity.current_principal_id().is_none() {
            return Err(VaultError::NotAuthenticated);
        }
        if self.session.is_locked() {
            return Err(VaultError::SessionLocked);
        }
        if !self.config.allow_identity_fallback {
            return Err(VaultError::KeyNotFound);
        }
        if self.master.has_sealed_key().await? {
            // Master key exists but is not unlocked
            return Err(VaultError::SessionLocked);
        }
        self.identity_kek()
    }

    fn identity_kek(&self) -> VaultResult<KeyHandle> {
        let principal = self
            .identity
            .current_principal_id()
            .ok_or(VaultError::NotAuthenticated)?;
        Ok(self.suite.derive_identity_key(&principal)?)
    }

    /// Create, seal, persist and cache a key for a new album. Holds the
    /// album gate so a concurrent create sees the first record.
    pub async fn provision_album_key(&self, album_id: &str) -> VaultResult<KeyHandle> {
        if self.session.is_locked() {
            return Err(VaultError::SessionLocked);
        }

        let gate = self.gate(album_id);
        let result = {
            let _guard = gate.lock().await;
            self.provision_locked(album_id).await
        };
        self.release_gate(album_id, gate);
        result
    }

    async fn provision_locked(&self, album_id: &str) -> VaultResult<KeyHandle> {
        let epoch = self.session.epoch();
        if self.load_record(album_id).await?.is_some() {
            return Err(VaultError::AlbumKeyExists(album_id.to_string()));
        }

        let key = self.create_album_key(album_id);
        let record = self.seal_album_key(album_id, &key).await?;
        self.store_record(&record).await?;
        self.session
            .put_if_current(&album_cache_id(album_id), key.clone(), epoch)?;

        info!(album_id, wrapped_by = record.wrapped_by.as_str(), "album key provisioned");
        Ok(key)
    }

    /// Cached key, or load and unwrap the stored record. Concurrent calls
    /// for one album share a single unwrap.
    pub async fn resolve_album_key(&self, album_id: &str) -> VaultResult<KeyHandle> {
        let cache_id = album_cache_id(album_id);
        if self.session.is_locked() {
            return Err(VaultError::SessionLocked);
        }
        if let Some(key) = self.session.get(&cache_id) {
            return Ok(key);
        }

        let gate = self.gate(album_id);
        let result = {
            let _guard = gate.lock().await;
            self.resolve_uncached(album_id, &cache_id).await
        };
        self.release_gate(album_id, gate);
        result
    }

    async fn resolve_uncached(&self, album_id: &str, cache_id: &str) -> VaultResult<KeyHandle> {
        let epoch = self.session.epoch();
        if self.session.is_locked() {
            return Err(VaultError::SessionLocked);
        }
        // Another resolve may have filled it while we waited
        if let Some(key) = self.session.get(cache_id) {
            return Ok(key);
        }

        let record = self
            .load_record(album_id)
            .await?
            .ok_or_else(|| VaultError::AlbumKeyNotFound(album_id.to_string()))?;
        let key = self.unwrap_record(album_id, &record)?;
        self.session.put_if_current(cache_id, key.clone(), epoch)?;

        debug!(album_id, wrapped_by = record.wrapped_by.as_str(), "album key resolved");
        Ok(key)
    }

    fn gate(&self, album_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock();
        Arc::clone(in_flight.entry(album_id.to_string()).or_default())
    }

    fn release_gate(&self, album_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // Map and our clone are the only holders left
        let last = Arc::strong_count(&gate) == 2;
        drop(gate);
        if last {
            in_flight.remove(album_id);
        }
    }

    fn unwrap_record(&self, album_id: &str, record: &SealedAlbumKey) -> VaultResult<KeyHandle> {
        let sealed = record
            .sealed_box()
            .map_err(|_| VaultError::AuthenticationFailed)?;
        let aad = album_aad(album_id);

        let key = match record.wrapped_by {
            KeyWrapping::MasterKey => {
                let (_, master) = self
                    .master
                    .cached_master_key()
                    .ok_or(VaultError::SessionLocked)?;
                self.suite.unwrap_key(&sealed, &master, &aad)
            }
            KeyWrapping::IdentityDerived => {
                let kek = self.identity_kek()?;
                self.suite.unwrap_key(&sealed, &kek, &aad)
            }
        };
        // Every unwrap failure looks the same to the caller
        key.map_err(|e| {
            debug!(album_id, error = %e, "album key unwrap failed");
            VaultError::AuthenticationFailed
        })
    }

    /// Re-seal an identity-derived album key under the master key. The key
    /// bytes do not change. Returns `false` if already migrated.
    pub async fn migrate_to_master_key(&self, album_id: &str) -> VaultResult<bool> {
        let epoch = self.session.epoch();
        let (_, master) = self
            .master
            .cached_master_key()
            .ok_or(VaultError::SessionLocked)?;

        let record = self
            .load_record(album_id)
            .await?
            .ok_or_else(|| VaultError::AlbumKeyNotFound(album_id.to_string()))?;

        match record.wrapped_by {
            KeyWrapping::MasterKey => {
                debug!(album_id, "album key already wrapped by master key");
                Ok(false)
            }
            KeyWrapping::IdentityDerived => {
                let key = self.unwrap_record(album_id, &record)?;
                let sealed = self.suite.wrap_key(&key, &master, &album_aad(album_id))?;
                let migrated = SealedAlbumKey {
                    created_at: record.created_at,
                    ..SealedAlbumKey::new(album_id, &sealed, KeyWrapping::MasterKey)
                };
                self.store_record(&migrated).await?;
                self.session
                    .put_if_current(&album_cache_id(album_id), key, epoch)?;

                info!(album_id, "album key migrated to master key wrapping");
                Ok(true)
            }
        }
    }

    /// Raw record, for status reporting
    pub async fn album_record(&self, album_id: &str) -> VaultResult<Option<SealedAlbumKey>> {
        self.load_record(album_id).await
    }

    async fn load_record(&self, album_id: &str) -> VaultResult<Option<SealedAlbumKey>> {
        let doc = with_timeout(
            self.config.io_timeout(),
            "read album key",
            self.store.get_document(&self.config.album_keys_collection, album_id),
        )
        .await?;

        let Some(doc) = doc else {
            return Ok(None);
        };
        match serde_json::from_value(doc) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(album_id, error = %e, "unreadable album key record");
                Err(VaultError::AuthenticationFailed)
            }
        }
    }

    async fn store_record(&self, record: &SealedAlbumKey) -> VaultResult<()> {
        let data = serde_json::to_value(record)?;
        with_timeout(
            self.config.io_timeout(),
            "write album key",
            self.store
                .set_document(&self.config.album_keys_collection, &record.album_id, data, false),
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use lumen_keyvault::{Argon2Config, Passphrase, SealedBox, StandardSuite};
    use secrecy::SecretString;
    use serde_json::Value;
    use zeroize::Zeroizing;

    use crate::master::tests::{pass, test_config};
    use crate::store::{MemoryStore, StaticIdentity};

    /// Standard suite that counts album-key unwraps and can stall payload opens
    #[derive(Default)]
    pub(crate) struct CountingSuite {
        inner: StandardSuite,
        pub album_unwraps: AtomicUsize,
        payload_open_delay: Duration,
    }

    impl CountingSuite {
        pub(crate) fn with_payload_open_delay(delay: Duration) -> Self {
            Self {
                payload_open_delay: delay,
                ..Self::default()
            }
        }
    }

    impl CipherSuite for CountingSuite {
        fn derive_password_key(
            &self,
            passphrase: &SecretString,
            salt: &[u8],
            params: &Argon2Config,
        ) -> lumen_keyvault::Result<KeyHandle> {
            self.inner.derive_password_key(passphrase, salt, params)
        }

        fn derive_identity_key(&self, principal_id: &str) -> lumen_keyvault::Result<KeyHandle> {
            self.inner.derive_identity_key(principal_id)
        }

        fn generate_key(&self) -> KeyHandle {
            self.inner.generate_key()
        }

        fn seal(&self, plaintext: &[u8], key: &KeyHandle, aad: &[u8]) -> lumen_keyvault::Result<SealedBox> {
            self.inner.seal(plaintext, key, aad)
        }

        fn open(
            &self,
            sealed: &SealedBox,
            key: &KeyHandle,
            aad: &[u8],
        ) -> lumen_keyvault::Result<Zeroizing<Vec<u8>>> {
            if aad.starts_with(b"lumen:payload:") && !self.payload_open_delay.is_zero() {
                std::thread::sleep(self.payload_open_delay);
            }
            self.inner.open(sealed, key, aad)
        }

        fn wrap_key(&self, key: &KeyHandle, kek: &KeyHandle, aad: &[u8]) -> lumen_keyvault::Result<SealedBox> {
            self.inner.wrap_key(key, kek, aad)
        }

        fn unwrap_key(&self, sealed: &SealedBox, kek: &KeyHandle, aad: &[u8]) -> lumen_keyvault::Result<KeyHandle> {
            if aad.starts_with(b"lumen:album-key:") {
                self.album_unwraps.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.unwrap_key(sealed, kek, aad)
        }
    }

    /// Memory store with a delay on every read
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn get_document(&self, collection: &str, id: &str) -> VaultResult<Option<Value>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_document(collection, id).await
        }

        async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool) -> VaultResult<()> {
            self.inner.set_document(collection, id, data, merge).await
        }
    }

    /// Store that rejects album key reads like a backend rule would
    struct DenyingStore;

    #[async_trait]
    impl DocumentStore for DenyingStore {
        async fn get_document(&self, collection: &str, _id: &str) -> VaultResult<Option<Value>> {
            if collection == "albumKeys" {
                Err(VaultError::AccessDenied("not a member".into()))
            } else {
                Ok(None)
            }
        }

        async fn set_document(&self, _: &str, _: &str, _: Value, _: bool) -> VaultResult<()> {
            Ok(())
        }
    }

    pub(crate) struct Setup {
        pub master: Arc<MasterKeyManager>,
        pub albums: Arc<AlbumKeyManager>,
        pub suite: Arc<CountingSuite>,
    }

    pub(crate) fn setup_with(store: Arc<dyn DocumentStore>, config: VaultConfig) -> Setup {
        setup_with_suite(store, config, CountingSuite::default())
    }

    pub(crate) fn setup_with_suite(
        store: Arc<dyn DocumentStore>,
        config: VaultConfig,
        suite: CountingSuite,
    ) -> Setup {
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::signed_in("u1"));
        let suite = Arc::new(suite);
        let config = Arc::new(config);
        let master = Arc::new(MasterKeyManager::new(
            store.clone(),
            identity.clone(),
            Arc::new(KeySession::new()),
            suite.clone(),
            config.clone(),
        ));
        let albums = Arc::new(AlbumKeyManager::new(
            store,
            identity,
            suite.clone(),
            config,
            master.clone(),
        ));
        Setup {
            master,
            albums,
            suite,
        }
    }

    fn setup(store: Arc<dyn DocumentStore>) -> Setup {
        setup_with(store, test_config())
    }

    fn passphrase() -> Passphrase {
        pass("Correct-Horse9!")
    }

    #[tokio::test]
    async fn test_master_wrapped_album_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());
        s.master.initialize(&passphrase()).await.unwrap();

        let key = s.albums.provision_album_key("A1").await.unwrap();
        let doc = store.snapshot("albumKeys", "A1").unwrap();
        assert_eq!(doc["wrappedBy"], "masterKey");
        assert_eq!(doc["albumId"], "A1");

        s.master.lock();
        s.master.unlock(&passphrase()).await.unwrap();

        let resolved = s.albums.resolve_album_key("A1").await.unwrap();
        assert_eq!(resolved.fingerprint(), key.fingerprint());
    }

    #[tokio::test]
    async fn test_identity_fallback_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());

        let key = s.albums.provision_album_key("A2").await.unwrap();
        assert_eq!(store.snapshot("albumKeys", "A2").unwrap()["wrappedBy"], "identityDerived");

        // A different session with no cached keys can still resolve it
        let other = setup(store.clone());
        let resolved = other.albums.resolve_album_key("A2").await.unwrap();
        assert_eq!(resolved.fingerprint(), key.fingerprint());
    }

    #[tokio::test]
    async fn test_fallback_refused_when_master_key_exists() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());
        s.master.initialize(&passphrase()).await.unwrap();

        // Fresh session for the same user, never unlocked
        let other = setup(store.clone());
        let result = other.albums.provision_album_key("A3").await;
        assert!(matches!(result, Err(VaultError::SessionLocked)));
        assert!(store.snapshot("albumKeys", "A3").is_none());
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let config = VaultConfig {
            allow_identity_fallback: false,
            ..test_config()
        };
        let s = setup_with(Arc::new(MemoryStore::new()), config);
        let result = s.albums.provision_album_key("A4").await;
        assert!(matches!(result, Err(VaultError::KeyNotFound)));
    }

    #[tokio::test]
    async fn test_provision_refuses_existing_album() {
        let s = setup(Arc::new(MemoryStore::new()));
        s.albums.provision_album_key("A5").await.unwrap();
        let again = s.albums.provision_album_key("A5").await;
        assert!(matches!(again, Err(VaultError::AlbumKeyExists(_))));
    }

    #[tokio::test]
    async fn test_concurrent_provision_creates_once() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(30),
        });
        let s = setup(store.clone());

        let (first, second) = tokio::join!(
            s.albums.provision_album_key("X"),
            s.albums.provision_album_key("X")
        );
        let (created, refused) = match (first, second) {
            (Ok(key), Err(e)) | (Err(e), Ok(key)) => (key, e),
            (first, second) => panic!("expected one create, got {:?} and {:?}", first.is_ok(), second.is_ok()),
        };
        assert!(matches!(refused, VaultError::AlbumKeyExists(id) if id == "X"));

        // The stored record holds the key the winner was given
        let other = setup(store.clone());
        let resolved = other.albums.resolve_album_key("X").await.unwrap();
        assert_eq!(resolved.fingerprint(), created.fingerprint());
        assert!(s.albums.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_fails_authentication() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());
        s.albums.provision_album_key("A1").await.unwrap();

        let mut tampered = store.snapshot("albumKeys", "A1").unwrap();
        tampered["wrappedBy"] = "foo".into();
        store.set_document("albumKeys", "A1", tampered, false).await.unwrap();

        let other = setup(store.clone());
        let err = other.albums.resolve_album_key("A1").await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed));
        assert!(err.is_recoverable());

        let mut missing_tag = store.snapshot("albumKeys", "A1").unwrap();
        missing_tag["wrappedBy"] = "identityDerived".into();
        missing_tag.as_object_mut().unwrap().remove("authTag");
        store.set_document("albumKeys", "A1", missing_tag, false).await.unwrap();
        assert!(matches!(
            other.albums.resolve_album_key("A1").await,
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_short_wrapped_key_fails_authentication() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());

        // Valid ciphertext under the right KEK, but only 16 key bytes inside
        let kek = s.suite.derive_identity_key("u1").unwrap();
        let sealed = s.suite.seal(&[7u8; 16], &kek, &album_aad("A6")).unwrap();
        let record = SealedAlbumKey::new("A6", &sealed, KeyWrapping::IdentityDerived);
        store
            .set_document("albumKeys", "A6", serde_json::to_value(&record).unwrap(), false)
            .await
            .unwrap();

        assert!(matches!(
            s.albums.resolve_album_key("A6").await,
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let s = setup(Arc::new(MemoryStore::new()));
        let result = s.albums.resolve_album_key("nope").await;
        assert!(matches!(result, Err(VaultError::AlbumKeyNotFound(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_access_denied_passes_through() {
        let s = setup(Arc::new(DenyingStore));
        let result = s.albums.resolve_album_key("A1").await;
        assert!(matches!(result, Err(VaultError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_record_moved_to_other_album_fails() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());
        s.albums.provision_album_key("A1").await.unwrap();

        let mut moved = store.snapshot("albumKeys", "A1").unwrap();
        moved["albumId"] = "B1".into();
        store.set_document("albumKeys", "B1", moved, false).await.unwrap();

        let result = s.albums.resolve_album_key("B1").await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_resolve_after_lock_is_refused() {
        let s = setup(Arc::new(MemoryStore::new()));
        s.master.initialize(&passphrase()).await.unwrap();
        s.albums.provision_album_key("A1").await.unwrap();

        s.master.lock();
        assert!(matches!(
            s.albums.resolve_album_key("A1").await,
            Err(VaultError::SessionLocked)
        ));

        s.master.unlock(&passphrase()).await.unwrap();
        assert!(s.albums.resolve_album_key("A1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_resolves_unwrap_once() {
        let memory = Arc::new(MemoryStore::new());
        let seed = setup(memory.clone());
        let key = seed.albums.provision_album_key("A1").await.unwrap();
        let records = memory.snapshot("albumKeys", "A1").unwrap();

        let slow = SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(20),
        };
        slow.inner.set_document("albumKeys", "A1", records, false).await.unwrap();
        let s = setup(Arc::new(slow));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let albums = s.albums.clone();
            tasks.push(tokio::spawn(async move { albums.resolve_album_key("A1").await }));
        }
        for task in tasks {
            let resolved = task.await.unwrap().unwrap();
            assert_eq!(resolved.fingerprint(), key.fingerprint());
        }

        assert_eq!(s.suite.album_unwraps.load(Ordering::SeqCst), 1);
        assert!(s.albums.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_lock_during_resolve() {
        let memory = Arc::new(MemoryStore::new());
        let seed = setup(memory.clone());
        seed.albums.provision_album_key("A2").await.unwrap();
        let record = memory.snapshot("albumKeys", "A2").unwrap();

        let slow = SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        };
        slow.inner.set_document("albumKeys", "A2", record, false).await.unwrap();
        let s = setup(Arc::new(slow));

        let albums = s.albums.clone();
        let pending = tokio::spawn(async move { albums.resolve_album_key("A2").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        s.master.lock();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(VaultError::SessionLocked)));
        assert!(s.master.session().is_empty());
    }

    #[tokio::test]
    async fn test_migration_keeps_key_bytes() {
        let store = Arc::new(MemoryStore::new());
        let s = setup(store.clone());

        let key = s.albums.provision_album_key("A2").await.unwrap();
        assert!(matches!(
            s.albums.migrate_to_master_key("A2").await,
            Err(VaultError::SessionLocked)
        ));

        s.master.initialize(&passphrase()).await.unwrap();
        assert!(s.albums.migrate_to_master_key("A2").await.unwrap());
        assert_eq!(store.snapshot("albumKeys", "A2").unwrap()["wrappedBy"], "masterKey");
        assert!(!s.albums.migrate_to_master_key("A2").await.unwrap());

        s.master.lock();
        s.master.unlock(&passphrase()).await.unwrap();
        let resolved = s.albums.resolve_album_key("A2").await.unwrap();
        assert_eq!(resolved.fingerprint(), key.fingerprint());
    }
}
