//! AEAD sealing - AES-256-GCM with a detached authentication tag

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{generate_nonce, KeyHandle, KeyMaterial, KeyUsage, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::encoding::{base64_array, base64_bytes};
use crate::error::{KeyVaultError, Result};

/// Output of a seal: ciphertext with its IV and tag kept apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedBox {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_array")]
    pub iv: [u8; NONCE_LEN],
    #[serde(with = "base64_array")]
    pub auth_tag: [u8; TAG_LEN],
}

impl SealedBox {
    /// Build from loosely-typed parts.
    ///
    /// Wrong IV or tag lengths report `AuthenticationFailed`, the same as a
    /// bad tag, so malformed records are indistinguishable from tampered ones.
    pub fn from_parts(ciphertext: Vec<u8>, iv: &[u8], auth_tag: &[u8]) -> Result<Self> {
        let iv: [u8; NONCE_LEN] = iv
            .try_into()
            .map_err(|_| KeyVaultError::AuthenticationFailed)?;
        let auth_tag: [u8; TAG_LEN] = auth_tag
            .try_into()
            .map_err(|_| KeyVaultError::AuthenticationFailed)?;
        Ok(Self { ciphertext, iv, auth_tag })
    }
}

fn cipher_for(key: &KeyMaterial) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.expose()).map_err(|e| KeyVaultError::Crypto(e.to_string()))
}

/// Encrypt `plaintext` under `key`, binding `aad`. A fresh IV is drawn per call.
pub fn seal(plaintext: &[u8], key: &KeyHandle, aad: &[u8]) -> Result<SealedBox> {
    if !key.usage().allows_encrypt() {
        return Err(KeyVaultError::KeyUsage("encrypt"));
    }
    let cipher = cipher_for(key.material())?;

    let iv = generate_nonce();
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
        .map_err(|e| KeyVaultError::Crypto(format!("AES-GCM encryption failed: {}", e)))?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(SealedBox {
        ciphertext: buffer,
        iv,
        auth_tag,
    })
}

/// Verify and decrypt. Nothing is returned unless the tag verifies.
pub fn open(sealed: &SealedBox, key: &KeyHandle, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if !key.usage().allows_decrypt() {
        return Err(KeyVaultError::KeyUsage("decrypt"));
    }
    let cipher = cipher_for(key.material())?;

    // The buffer is zeroized on drop, so a failed decrypt leaves nothing behind.
    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(&sealed.auth_tag),
        )
        .map_err(|_| KeyVaultError::AuthenticationFailed)?;

    Ok(buffer)
}

/// Seal the bytes of `key` under `kek`
pub fn wrap_key(key: &KeyHandle, kek: &KeyHandle, aad: &[u8]) -> Result<SealedBox> {
    seal(key.material().expose(), kek, aad)
}

/// Open a wrapped key. Plaintext of the wrong length is rejected.
pub fn unwrap_key(sealed: &SealedBox, kek: &KeyHandle, aad: &[u8], usage: KeyUsage) -> Result<KeyHandle> {
    let plaintext = open(sealed, kek, aad)?;
    if plaintext.len() != KEY_LEN {
        return Err(KeyVaultError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: plaintext.len(),
        });
    }
    let material = KeyMaterial::from_slice(&plaintext)?;
    Ok(KeyHandle::from_material(material, usage))
}
