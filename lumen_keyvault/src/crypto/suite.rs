//! The primitive layer as one injectable trait

use secrecy::SecretString;
use zeroize::Zeroizing;

use super::aead::{self, SealedBox};
use super::argon2_kdf::{self, Argon2Config};
use super::hkdf_derive;
use super::keys::{KeyHandle, KeyUsage};
use crate::error::Result;

/// Every cryptographic operation the key managers and photo cipher need.
///
/// Components hold an `Arc<dyn CipherSuite>` so tests can substitute an
/// instrumented implementation.
pub trait CipherSuite: Send + Sync {
    /// Argon2id passphrase derivation
    fn derive_password_key(
        &self,
        passphrase: &SecretString,
        salt: &[u8],
        params: &Argon2Config,
    ) -> Result<KeyHandle>;

    /// Deterministic KEK from a principal id
    fn derive_identity_key(&self, principal_id: &str) -> Result<KeyHandle>;

    /// Fresh random 256-bit key
    fn generate_key(&self) -> KeyHandle;

    fn seal(&self, plaintext: &[u8], key: &KeyHandle, aad: &[u8]) -> Result<SealedBox>;

    fn open(&self, sealed: &SealedBox, key: &KeyHandle, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    fn wrap_key(&self, key: &KeyHandle, kek: &KeyHandle, aad: &[u8]) -> Result<SealedBox>;

    fn unwrap_key(&self, sealed: &SealedBox, kek: &KeyHandle, aad: &[u8]) -> Result<KeyHandle>;
}

/// Argon2id + AES-256-GCM + HKDF-SHA256
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardSuite;

impl CipherSuite for StandardSuite {
    fn derive_password_key(
        &self,
        passphrase: &SecretString,
        salt: &[u8],
        params: &Argon2Config,
    ) -> Result<KeyHandle> {
        argon2_kdf::derive_password_key(passphrase, salt, params)
    }

    fn derive_identity_key(&self, principal_id: &str) -> Result<KeyHandle> {
        hkdf_derive::derive_identity_key(principal_id)
    }

    fn generate_key(&self) -> KeyHandle {
        KeyHandle::generate(KeyUsage::EncryptDecrypt)
    }

    fn seal(&self, plaintext: &[u8], key: &KeyHandle, aad: &[u8]) -> Result<SealedBox> {
        aead::seal(plaintext, key, aad)
    }

    fn open(&self, sealed: &SealedBox, key: &KeyHandle, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        aead::open(sealed, key, aad)
    }

    fn wrap_key(&self, key: &KeyHandle, kek: &KeyHandle, aad: &[u8]) -> Result<SealedBox> {
        aead::wrap_key(key, kek, aad)
    }

    fn unwrap_key(&self, sealed: &SealedBox, kek: &KeyHandle, aad: &[u8]) -> Result<KeyHandle> {
        aead::unwrap_key(sealed, kek, aad, KeyUsage::EncryptDecrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_suite_is_object_safe() {
        let suite: Arc<dyn CipherSuite> = Arc::new(StandardSuite);
        let key = suite.generate_key();
        let sealed = suite.seal(b"through the trait", &key, b"ctx").unwrap();
        assert_eq!(suite.open(&sealed, &key, b"ctx").unwrap().as_slice(), b"through the trait");
    }

    #[test]
    fn test_suite_wraps_keys() {
        let suite = StandardSuite;
        let kek = suite.derive_identity_key("alice").unwrap();
        let album = suite.generate_key();

        let wrapped = suite.wrap_key(&album, &kek, b"album-key:A2").unwrap();
        let back = suite.unwrap_key(&wrapped, &kek, b"album-key:A2").unwrap();

        assert_eq!(back.fingerprint(), album.fingerprint());
    }
}
