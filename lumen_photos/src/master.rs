//! Lumen Photos - Master Key Manager
//!
//! Owns the passphrase-protected root of the key hierarchy.
//!
//! ```text
//! passphrase ──Argon2id(salt)──► KEK ──AES-256-GCM──► SealedMasterKey
//!                                                     users/<principal>.encryption
//! ```
//!
//! States: `Uninitialized → Locked ⇄ Unlocked`. The unsealed master key only
//! ever lives in the [`KeySession`].

use std::sync::Arc;

use chrono::Utc;
use lumen_keyvault::crypto::{generate_salt, KDF_ALGORITHM, KDF_VERSION, SALT_LEN};
use lumen_keyvault::{Argon2Config, CipherSuite, KeyHandle, Passphrase};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::KeySession;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::records::{MasterKeyMetadata, SealedMasterKey, UserEncryptionBlock, USER_ENCRYPTION_FIELD};
use crate::store::{with_timeout, DocumentStore, IdentityProvider};

/// Master key lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterKeyState {
    /// No sealed master key exists for the principal
    Uninitialized,
    /// Sealed key exists, not in the session cache
    Locked,
    /// Unsealed key is cached
    Unlocked,
}

/// Cache id of a principal's master key
pub fn master_key_id(principal_id: &str) -> String {
    format!("master:{}", principal_id)
}

fn master_aad(key_id: &str) -> Vec<u8> {
    format!("lumen:master:{}", key_id).into_bytes()
}

/// Output of [`MasterKeyManager::generate`]
pub struct GeneratedMasterKey {
    pub sealed: SealedMasterKey,
    pub metadata: MasterKeyMetadata,
    /// Plaintext key, wiped on drop
    pub key: KeyHandle,
}

/// Master key manager
pub struct MasterKeyManager {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    session: Arc<KeySession>,
    suite: Arc<dyn CipherSuite>,
    config: Arc<VaultConfig>,
}

impl MasterKeyManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        session: Arc<KeySession>,
        suite: Arc<dyn CipherSuite>,
        config: Arc<VaultConfig>,
    ) -> Self {
        Self {
            store,
            identity,
            session,
            suite,
            config,
        }
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    fn principal(&self) -> VaultResult<String> {
        self.identity
            .current_principal_id()
            .ok_or(VaultError::NotAuthenticated)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BUILDING BLOCKS
    // ═══════════════════════════════════════════════════════════════════════

    /// Generate a fresh master key and seal it under `passphrase`.
    /// Nothing is persisted or cached.
    pub async fn generate(&self, passphrase: &Passphrase) -> VaultResult<GeneratedMasterKey> {
        let principal = self.principal()?;
        self.config
            .passphrase_policy
            .validate(passphrase.expose_secret())?;

        let params = self.config.kdf;
        params.validate()?;

        let key_id = master_key_id(&principal);
        let key = self.suite.generate_key();
        let salt = generate_salt();

        let kek = self.derive_kek(passphrase, &salt, params).await?;
        let sealed = self.suite.wrap_key(&key, &kek, &master_aad(&key_id))?;

        Ok(GeneratedMasterKey {
            sealed: SealedMasterKey::new(&sealed, &salt, KDF_VERSION),
            metadata: MasterKeyMetadata::new(key_id, KDF_VERSION, KDF_ALGORITHM, &params),
            key,
        })
    }

    /// Argon2id off the async executor
    async fn derive_kek(
        &self,
        passphrase: &Passphrase,
        salt: &[u8],
        params: Argon2Config,
    ) -> VaultResult<KeyHandle> {
        let suite = Arc::clone(&self.suite);
        let passphrase = Passphrase::from(passphrase.expose_secret().to_owned());
        let salt = salt.to_vec();

        let kek = tokio::task::spawn_blocking(move || {
            suite.derive_password_key(&passphrase, &salt, &params)
        })
        .await
        .map_err(|e| VaultError::Crypto(format!("key derivation task failed: {}", e)))??;

        Ok(kek)
    }

    /// Merge-upsert `{ masterKey, metadata }` into the principal's user document
    pub async fn persist(&self, sealed: &SealedMasterKey, metadata: &MasterKeyMetadata) -> VaultResult<()> {
        let block = UserEncryptionBlock {
            master_key: sealed.clone(),
            metadata: metadata.clone(),
        };
        self.write_encryption_field(serde_json::to_value(&block)?).await
    }

    async fn write_encryption_field(&self, value: Value) -> VaultResult<()> {
        let principal = self.principal()?;
        let mut doc = Map::new();
        doc.insert(USER_ENCRYPTION_FIELD.to_string(), value);

        with_timeout(
            self.config.io_timeout(),
            "write user encryption record",
            self.store
                .set_document(&self.config.users_collection, &principal, Value::Object(doc), true),
        )
        .await
    }

    /// Load the sealed master key, `None` if the principal never initialized
    pub async fn retrieve(&self) -> VaultResult<Option<UserEncryptionBlock>> {
        let principal = self.principal()?;
        self.retrieve_for(&principal).await
    }

    async fn retrieve_for(&self, principal: &str) -> VaultResult<Option<UserEncryptionBlock>> {
        let doc = with_timeout(
            self.config.io_timeout(),
            "read user encryption record",
            self.store.get_document(&self.config.users_collection, principal),
        )
        .await?;

        let block = match doc.and_then(|mut doc| doc.get_mut(USER_ENCRYPTION_FIELD).map(Value::take)) {
            None | Some(Value::Null) => return Ok(None),
            Some(block) => block,
        };

        match serde_json::from_value(block) {
            Ok(block) => Ok(Some(block)),
            Err(e) => {
                warn!(principal, error = %e, "unreadable master key record");
                Err(VaultError::DecryptionFailed)
            }
        }
    }

    /// Unseal with `passphrase`.
    ///
    /// A wrong passphrase and a corrupted record both end up as
    /// [`VaultError::DecryptionFailed`].
    pub async fn unseal(&self, block: &UserEncryptionBlock, passphrase: &Passphrase) -> VaultResult<KeyHandle> {
        match self.try_unseal(block, passphrase).await {
            Ok(key) => Ok(key),
            Err(e) => {
                debug!(error = %e, "master key unseal failed");
                Err(VaultError::DecryptionFailed)
            }
        }
    }

    async fn try_unseal(&self, block: &UserEncryptionBlock, passphrase: &Passphrase) -> VaultResult<KeyHandle> {
        if block.master_key.version != KDF_VERSION || block.metadata.version != KDF_VERSION {
            warn!(
                sealed_version = block.master_key.version,
                metadata_version = block.metadata.version,
                "unsupported master key record version"
            );
            return Err(VaultError::DecryptionFailed);
        }
        let params = block.metadata.kdf_params();
        params.validate()?;

        let salt = block.master_key.salt_bytes()?;
        if salt.len() != SALT_LEN {
            return Err(VaultError::DecryptionFailed);
        }
        let sealed = block.master_key.sealed_box()?;

        let kek = self.derive_kek(passphrase, &salt, params).await?;
        let key = self
            .suite
            .unwrap_key(&sealed, &kek, &master_aad(&block.metadata.key_id))?;
        Ok(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// First-time setup: generate, persist, cache
    pub async fn initialize(&self, passphrase: &Passphrase) -> VaultResult<MasterKeyMetadata> {
        let principal = self.principal()?;
        if self.retrieve_for(&principal).await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let generated = self.generate(passphrase).await?;
        self.persist(&generated.sealed, &generated.metadata).await?;

        let GeneratedMasterKey { metadata, key, .. } = generated;
        self.session.unlock_with(&metadata.key_id, key);

        info!(key_id = %metadata.key_id, "master key initialized");
        Ok(metadata)
    }

    /// Unseal the stored master key into the session and record `lastUsed`.
    /// Any failure, including the `lastUsed` write, clears the session.
    pub async fn unlock(&self, passphrase: &Passphrase) -> VaultResult<()> {
        let result = match self.try_unlock(passphrase).await {
            Ok(key_id) => self.touch_last_used().await.map(|()| key_id),
            Err(e) => Err(e),
        };
        match result {
            Ok(key_id) => {
                info!(%key_id, "session unlocked");
                Ok(())
            }
            Err(e) => {
                self.session.clear_all();
                warn!(error = %e, "unlock failed");
                Err(e)
            }
        }
    }

    async fn try_unlock(&self, passphrase: &Passphrase) -> VaultResult<String> {
        let principal = self.principal()?;
        let block = self
            .retrieve_for(&principal)
            .await?
            .ok_or(VaultError::KeyNotFound)?;

        let key_id = master_key_id(&principal);
        if block.metadata.key_id != key_id {
            warn!(%key_id, found = %block.metadata.key_id, "master key record belongs to another key id");
            return Err(VaultError::DecryptionFailed);
        }

        let key = self.unseal(&block, passphrase).await?;
        self.session.unlock_with(&key_id, key);
        Ok(key_id)
    }

    async fn touch_last_used(&self) -> VaultResult<()> {
        let patch = serde_json::json!({ "metadata": { "lastUsed": Utc::now() } });
        self.write_encryption_field(patch).await
    }

    /// Master key is cached and the session is open
    pub fn is_unlocked(&self) -> bool {
        match self.identity.current_principal_id() {
            Some(principal) => {
                !self.session.is_locked() && self.session.contains(&master_key_id(&principal))
            }
            None => false,
        }
    }

    /// Wipe every cached key
    pub fn lock(&self) {
        self.session.clear_all();
        info!("session locked");
    }

    pub async fn state(&self) -> VaultResult<MasterKeyState> {
        if self.is_unlocked() {
            return Ok(MasterKeyState::Unlocked);
        }
        match self.retrieve().await? {
            Some(_) => Ok(MasterKeyState::Locked),
            None => Ok(MasterKeyState::Uninitialized),
        }
    }

    /// `(key id, key)` when unlocked
    pub fn cached_master_key(&self) -> Option<(String, KeyHandle)> {
        let principal = self.identity.current_principal_id()?;
        if self.session.is_locked() {
            return None;
        }
        let key_id = master_key_id(&principal);
        self.session.get(&key_id).map(|key| (key_id, key))
    }

    /// Whether a sealed master key exists for the current principal
    pub async fn has_sealed_key(&self) -> VaultResult<bool> {
        Ok(self.retrieve().await?.is_some())
    }

    /// Re-seal the same master key under a new passphrase, fresh salt and
    /// the currently configured KDF parameters. Album records are untouched.
    pub async fn change_passphrase(&self, old: &Passphrase, new: &Passphrase) -> VaultResult<MasterKeyMetadata> {
        let principal = self.principal()?;
        self.config.passphrase_policy.validate(new.expose_secret())?;
        let params = self.config.kdf;
        params.validate()?;

        let block = self
            .retrieve_for(&principal)
            .await?
            .ok_or(VaultError::KeyNotFound)?;
        let key_id = master_key_id(&principal);
        if block.metadata.key_id != key_id {
            return Err(VaultError::DecryptionFailed);
        }

        let key = self.unseal(&block, old).await?;

        let salt = generate_salt();
        let kek = self.derive_kek(new, &salt, params).await?;
        let sealed = self.suite.wrap_key(&key, &kek, &master_aad(&key_id))?;

        let mut metadata = MasterKeyMetadata::new(key_id.clone(), KDF_VERSION, KDF_ALGORITHM, &params);
        metadata.created_at = block.metadata.created_at;
        self.persist(&SealedMasterKey::new(&sealed, &salt, KDF_VERSION), &metadata)
            .await?;

        self.session.unlock_with(&key_id, key);
        info!(%key_id, memory_cost = params.memory_cost_kib, "master key re-sealed");
        Ok(metadata)
    }
}
