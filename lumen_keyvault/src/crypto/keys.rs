//! Key handles - raw key bytes wrapped so they never leave this crate

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyVaultError, Result};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Salt length for password derivation
pub const SALT_LEN: usize = 16;

/// What a key handle may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
    EncryptDecrypt,
}

impl KeyUsage {
    pub fn allows_encrypt(&self) -> bool {
        matches!(self, Self::Encrypt | Self::EncryptDecrypt)
    }

    pub fn allows_decrypt(&self) -> bool {
        matches!(self, Self::Decrypt | Self::EncryptDecrypt)
    }
}

/// 256-bit key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub(crate) fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_LEN {
            return Err(KeyVaultError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Opaque symmetric key.
///
/// There is no public accessor for the bytes; callers can only seal, open,
/// wrap and unwrap through this crate. Every clone wipes itself on drop.
#[derive(Clone)]
pub struct KeyHandle {
    material: KeyMaterial,
    usage: KeyUsage,
}

impl KeyHandle {
    pub(crate) fn from_material(material: KeyMaterial, usage: KeyUsage) -> Self {
        Self { material, usage }
    }

    /// Generate a fresh random key from the OS RNG
    pub fn generate(usage: KeyUsage) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let handle = Self::from_material(KeyMaterial::new(bytes), usage);
        bytes.zeroize();
        handle
    }

    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Short key check value, safe to log. Not reversible to the key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"lumen:key-check:v1");
        hasher.update(self.material.expose());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Overwrite the key bytes now instead of waiting for drop.
    pub fn wipe(&mut self) {
        self.material.zeroize();
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("usage", &self.usage)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Wrap raw key bytes into a handle. The caller should wipe `raw` afterwards.
pub fn import_key(raw: &[u8], usage: KeyUsage) -> Result<KeyHandle> {
    Ok(KeyHandle::from_material(KeyMaterial::from_slice(raw)?, usage))
}

/// Random bytes from the OS RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Fresh random 96-bit GCM nonce
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    random_bytes::<NONCE_LEN>()
}

/// Fresh random salt for password derivation
pub fn generate_salt() -> [u8; SALT_LEN] {
    random_bytes::<SALT_LEN>()
}
