//! Lumen Photos - Unified Public API
//!
//! Single entry point wiring the key session, master and album key
//! managers, photo cipher and session guard over one document store.

use std::path::Path;
use std::sync::Arc;

use lumen_keyvault::{CipherSuite, KeyHandle, Passphrase, StandardSuite};
use serde::Serialize;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::album::AlbumKeyManager;
use crate::cache::KeySession;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::master::{MasterKeyManager, MasterKeyState};
use crate::photo_crypto::{PhotoCipher, PhotoHandle};
use crate::records::{EncryptedPayload, KeyWrapping, MasterKeyMetadata};
use crate::session_guard::SessionGuard;
use crate::store::{DocumentStore, IdentityProvider};

// ═══════════════════════════════════════════════════════════════════════════════
// PHOTO VAULT API
// ═══════════════════════════════════════════════════════════════════════════════

/// Lumen Photos API
///
/// # Example
///
/// ```rust,ignore
/// use lumen_photos::{PhotoVaultApi, MemoryStore, StaticIdentity, VaultConfig};
///
/// let api = PhotoVaultApi::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(StaticIdentity::signed_in("alice")),
///     VaultConfig::default(),
/// );
///
/// api.initialize_master_key(&passphrase).await?;
/// api.create_album("A1").await?;
///
/// let payload = api.encrypt_payload("A1", &jpeg).await?;
/// let bytes = api.decrypt_payload("A1", &payload).await?;
///
/// api.lock();
/// ```
pub struct PhotoVaultApi {
    config: Arc<VaultConfig>,
    session: Arc<KeySession>,
    master: Arc<MasterKeyManager>,
    albums: Arc<AlbumKeyManager>,
    cipher: Arc<PhotoCipher>,
    guard: Arc<SessionGuard>,
}

impl PhotoVaultApi {
    // ═══════════════════════════════════════════════════════════════════════
    // CONSTRUCTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Build with the standard cipher suite
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: VaultConfig,
    ) -> Self {
        Self::with_suite(store, identity, Arc::new(StandardSuite), config)
    }

    /// Build with a caller-supplied cipher suite
    pub fn with_suite(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        suite: Arc<dyn CipherSuite>,
        config: VaultConfig,
    ) -> Self {
        let config = Arc::new(config);
        let session = Arc::new(KeySession::new());

        let master = Arc::new(MasterKeyManager::new(
            store.clone(),
            identity.clone(),
            session.clone(),
            suite.clone(),
            config.clone(),
        ));
        let albums = Arc::new(AlbumKeyManager::new(
            store,
            identity,
            suite.clone(),
            config.clone(),
            master.clone(),
        ));
        let cipher = Arc::new(PhotoCipher::new(albums.clone(), suite));

        let on_lock = cipher.clone();
        let guard = Arc::new(
            SessionGuard::new(master.clone(), config.idle_timeout()).with_lock_hook(move || {
                on_lock.release_all();
            }),
        );

        Self {
            config,
            session,
            master,
            albums,
            cipher,
            guard,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MASTER KEY / SESSION
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn initialize_master_key(&self, passphrase: &Passphrase) -> VaultResult<MasterKeyMetadata> {
        let metadata = self.master.initialize(passphrase).await?;
        self.guard.record_activity();
        Ok(metadata)
    }

    pub async fn unlock_master_key(&self, passphrase: &Passphrase) -> VaultResult<()> {
        self.master.unlock(passphrase).await?;
        self.guard.record_activity();
        Ok(())
    }

    /// Wipe every cached key and every decrypted photo buffer
    pub fn lock(&self) {
        self.master.lock();
        self.cipher.release_all();
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.is_unlocked()
    }

    pub async fn master_key_state(&self) -> VaultResult<MasterKeyState> {
        self.master.state().await
    }

    pub async fn change_passphrase(&self, old: &Passphrase, new: &Passphrase) -> VaultResult<MasterKeyMetadata> {
        self.master.change_passphrase(old, new).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    /// Provision the key for a new album
    pub async fn create_album(&self, album_id: &str) -> VaultResult<KeyWrapping> {
        self.albums.provision_album_key(album_id).await?;
        self.album_wrapping(album_id)
            .await?
            .ok_or_else(|| VaultError::AlbumKeyNotFound(album_id.to_string()))
    }

    pub async fn resolve_album_key(&self, album_id: &str) -> VaultResult<KeyHandle> {
        self.albums.resolve_album_key(album_id).await
    }

    /// Move an identity-wrapped album under the master key
    pub async fn migrate_album(&self, album_id: &str) -> VaultResult<bool> {
        self.albums.migrate_to_master_key(album_id).await
    }

    /// How an album's key is wrapped, `None` if the album has no key
    pub async fn album_wrapping(&self, album_id: &str) -> VaultResult<Option<KeyWrapping>> {
        Ok(self
            .albums
            .album_record(album_id)
            .await?
            .map(|record| record.wrapped_by))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTOS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn encrypt_payload(&self, album_id: &str, plaintext: &[u8]) -> VaultResult<EncryptedPayload> {
        self.cipher.encrypt_payload(album_id, plaintext).await
    }

    pub async fn decrypt_payload(
        &self,
        album_id: &str,
        payload: &EncryptedPayload,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.cipher.decrypt_payload(album_id, payload).await
    }

    pub async fn decrypt_to_ephemeral_handle(
        &self,
        album_id: &str,
        payload: &EncryptedPayload,
    ) -> VaultResult<PhotoHandle> {
        self.cipher.decrypt_to_ephemeral_handle(album_id, payload).await
    }

    pub fn read_handle(&self, handle: &PhotoHandle) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.cipher.read_handle(handle)
    }

    pub fn release_handle(&self, handle: &PhotoHandle) -> bool {
        self.cipher.release(handle)
    }

    pub async fn encrypt_file(&self, album_id: &str, input: &Path, output: &Path) -> VaultResult<usize> {
        self.cipher.encrypt_file(album_id, input, output).await
    }

    pub async fn decrypt_file(&self, album_id: &str, input: &Path, output: &Path) -> VaultResult<usize> {
        self.cipher.decrypt_file(album_id, input, output).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SESSION GUARD
    // ═══════════════════════════════════════════════════════════════════════

    pub fn record_activity(&self) {
        self.guard.record_activity();
    }

    pub fn visibility_changed(&self, visible: bool) {
        self.guard.visibility_changed(visible);
    }

    /// Start the background idle check at the configured poll interval
    pub fn spawn_session_guard(&self) -> JoinHandle<()> {
        self.guard.spawn(self.config.guard_poll_interval())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATUS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn status(&self) -> VaultResult<VaultStatus> {
        Ok(VaultStatus {
            state: self.master.state().await?,
            cached_keys: self.session.len(),
            open_handles: self.cipher.handles().len(),
            session_epoch: self.session.epoch(),
            idle_timeout_secs: self.guard.idle_timeout().as_secs(),
        })
    }
}

/// Session summary for status displays
#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub state: MasterKeyState,
    pub cached_keys: usize,
    pub open_handles: usize,
    pub session_epoch: u64,
    pub idle_timeout_secs: u64,
}
