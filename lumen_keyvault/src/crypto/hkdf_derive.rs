//! HKDF derivation of non-password keys

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::keys::{KeyHandle, KeyMaterial, KeyUsage, KEY_LEN};
use crate::error::{KeyVaultError, Result};

/// Predefined derivation purposes
pub mod purposes {
    pub const IDENTITY_KEK: &[u8] = b"lumen:album-kek:identity:v1";
    pub const IDENTITY_SALT: &[u8] = b"lumen:identity-salt:v1";
}

/// Derive a 32-byte subkey with HKDF-SHA256
pub fn derive_subkey(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<KeyHandle> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| KeyVaultError::KeyDerivationFailed(e.to_string()))?;

    let handle = KeyHandle::from_material(KeyMaterial::new(okm), KeyUsage::EncryptDecrypt);
    okm.zeroize();
    Ok(handle)
}

/// Derive the album KEK from a principal's stable identifier.
///
/// Anyone who knows the identifier can recompute this key. It protects album
/// keys only until the owner sets up a passphrase-protected master key.
pub fn derive_identity_key(principal_id: &str) -> Result<KeyHandle> {
    if principal_id.is_empty() {
        return Err(KeyVaultError::KeyDerivationFailed("empty principal id".into()));
    }
    let mut digest: [u8; 32] = Sha256::digest(principal_id.as_bytes()).into();
    let key = derive_subkey(&digest, purposes::IDENTITY_SALT, purposes::IDENTITY_KEK);
    digest.zeroize();
    key
}
