//! Cryptographic primitives - Argon2id, AES-256-GCM, HKDF, wiping

mod aead;
mod argon2_kdf;
mod hkdf_derive;
mod keys;
mod suite;
mod zeroize_utils;

pub use aead::{open, seal, unwrap_key, wrap_key, SealedBox};
pub use argon2_kdf::{
    derive_password_key, Argon2Config, KDF_ALGORITHM, KDF_VERSION, MIN_MEMORY_COST_KIB,
    MIN_TIME_COST,
};
pub use hkdf_derive::{derive_identity_key, derive_subkey};
pub use keys::{
    generate_nonce, generate_salt, import_key, random_bytes, KeyHandle, KeyUsage, KEY_LEN,
    NONCE_LEN, SALT_LEN, TAG_LEN,
};
pub use suite::{CipherSuite, StandardSuite};
pub use zeroize_utils::{wipe, wipe_vec, SecureBuffer};

/// Passphrase wrapper, zeroized on drop
pub type Passphrase = secrecy::SecretString;
