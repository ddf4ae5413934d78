//! Lumen Photos - Configuration

use std::path::Path;
use std::time::Duration;

use lumen_keyvault::{Argon2Config, PassphrasePolicy};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Argon2id parameters used for new or re-sealed master keys
    pub kdf: Argon2Config,
    /// Passphrase strength requirements
    pub passphrase_policy: PassphrasePolicy,
    /// Lock after this much inactivity
    pub idle_timeout_secs: u64,
    /// How often the session guard checks for inactivity
    pub guard_poll_interval_ms: u64,
    /// Upper bound on a single document-store call
    pub io_timeout_ms: u64,
    /// Allow album keys wrapped under an identity-derived KEK before a
    /// master key exists
    pub allow_identity_fallback: bool,
    /// Collection holding user records
    pub users_collection: String,
    /// Collection holding sealed album keys
    pub album_keys_collection: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: Argon2Config::default(),
            passphrase_policy: PassphrasePolicy::default(),
            idle_timeout_secs: 15 * 60,
            guard_poll_interval_ms: 30_000,
            io_timeout_ms: 10_000,
            allow_identity_fallback: true,
            users_collection: "users".into(),
            album_keys_collection: "albumKeys".into(),
        }
    }
}

impl VaultConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: &Path) -> VaultResult<Self> {
        let data = std::fs::read(path)?;
        let config: VaultConfig = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the managers cannot run with
    pub fn validate(&self) -> VaultResult<()> {
        self.kdf.validate()?;
        if self.idle_timeout_secs == 0 {
            return Err(VaultError::Config("idle_timeout_secs must be positive".into()));
        }
        if self.io_timeout_ms == 0 || self.guard_poll_interval_ms == 0 {
            return Err(VaultError::Config("timeouts must be positive".into()));
        }
        if self.users_collection.is_empty() || self.album_keys_collection.is_empty() {
            return Err(VaultError::Config("collection names must not be empty".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn guard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.guard_poll_interval_ms)
    }
}
