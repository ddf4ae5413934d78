//! Argon2id KDF for deriving a KEK from a passphrase

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::keys::{KeyHandle, KeyMaterial, KeyUsage, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Name recorded in key metadata
pub const KDF_ALGORITHM: &str = "argon2id";

/// Derivation scheme version. Bump when the KDF or its inputs change.
pub const KDF_VERSION: u32 = 1;

/// Lowest accepted memory cost (KiB), the OWASP Argon2id floor
pub const MIN_MEMORY_COST_KIB: u32 = 19 * 1024;

/// Lowest accepted iteration count
pub const MIN_TIME_COST: u32 = 2;

/// Upper bounds so a tampered record cannot make unlock allocate gigabytes
pub const MAX_MEMORY_COST_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_TIME_COST: u32 = 64;
pub const MAX_PARALLELISM: u32 = 16;

/// Argon2id configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Config {
    /// Memory in KiB
    pub memory_cost_kib: u32,
    /// Iterations (time cost)
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }
}

impl Argon2Config {
    /// The cheapest configuration still above the floor
    pub fn minimum() -> Self {
        Self {
            memory_cost_kib: MIN_MEMORY_COST_KIB,
            time_cost: MIN_TIME_COST,
            parallelism: 1,
        }
    }

    /// Configuration for strong devices
    pub fn high_security() -> Self {
        Self {
            memory_cost_kib: 256 * 1024, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Reject parameters below the floor or above the ceilings
    pub fn validate(&self) -> Result<()> {
        if self.memory_cost_kib < MIN_MEMORY_COST_KIB {
            return Err(KeyVaultError::WeakParameters(format!(
                "memory cost {} KiB is below {} KiB",
                self.memory_cost_kib, MIN_MEMORY_COST_KIB
            )));
        }
        if self.time_cost < MIN_TIME_COST {
            return Err(KeyVaultError::WeakParameters(format!(
                "iterations {} is below {}",
                self.time_cost, MIN_TIME_COST
            )));
        }
        if self.parallelism < 1 {
            return Err(KeyVaultError::WeakParameters(
                "parallelism must be at least 1".into(),
            ));
        }
        if self.memory_cost_kib > MAX_MEMORY_COST_KIB
            || self.time_cost > MAX_TIME_COST
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(KeyVaultError::WeakParameters(
                "parameters exceed supported maximum".into(),
            ));
        }
        Ok(())
    }
}

/// Derive a 256-bit key-encryption key from a passphrase
pub fn derive_password_key(
    password: &SecretString,
    salt: &[u8],
    config: &Argon2Config,
) -> Result<KeyHandle> {
    config.validate()?;
    tracing::debug!(
        memory_cost_kib = config.memory_cost_kib,
        time_cost = config.time_cost,
        parallelism = config.parallelism,
        "Deriving passphrase key"
    );

    let params = Params::new(
        config.memory_cost_kib,
        config.time_cost,
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; KEY_LEN];
    let derived = argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut output)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(format!("Hashing failed: {}", e)));

    let handle = derived.map(|_| KeyHandle::from_material(KeyMaterial::new(output), KeyUsage::EncryptDecrypt));
    output.zeroize();
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password(p: &str) -> SecretString {
        SecretString::from(p.to_string())
    }

    #[test]
    fn test_derive_deterministic() {
        let salt = [1u8; 16];
        let config = Argon2Config::minimum();

        let k1 = derive_password_key(&password("test_password"), &salt, &config).unwrap();
        let k2 = derive_password_key(&password("test_password"), &salt, &config).unwrap();

        assert_eq!(k1.material().expose(), k2.material().expose());
    }

    #[test]
    fn test_salt_changes_key() {
        let config = Argon2Config::minimum();
        let k1 = derive_password_key(&password("pw"), &[1u8; 16], &config).unwrap();
        let k2 = derive_password_key(&password("pw"), &[2u8; 16], &config).unwrap();
        assert_ne!(k1.material().expose(), k2.material().expose());
    }

    #[test]
    fn test_weak_memory_rejected() {
        let config = Argon2Config {
            memory_cost_kib: 1024,
            ..Argon2Config::minimum()
        };
        let result = derive_password_key(&password("pw"), &[0u8; 16], &config);
        assert!(matches!(result, Err(KeyVaultError::WeakParameters(_))));
    }

    #[test]
    fn test_weak_iterations_rejected() {
        let config = Argon2Config {
            time_cost: 1,
            ..Argon2Config::minimum()
        };
        assert!(matches!(config.validate(), Err(KeyVaultError::WeakParameters(_))));
    }

    #[test]
    fn test_oversized_parameters_rejected() {
        let config = Argon2Config {
            memory_cost_kib: u32::MAX,
            ..Argon2Config::minimum()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets_pass_validation() {
        assert!(Argon2Config::default().validate().is_ok());
        assert!(Argon2Config::minimum().validate().is_ok());
        assert!(Argon2Config::high_security().validate().is_ok());
    }
}
