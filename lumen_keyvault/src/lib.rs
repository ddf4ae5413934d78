//! # Lumen Keyvault
//!
//! Primitive layer for Lumen's envelope encryption:
//! - Argon2id derivation of key-encryption keys from passphrases
//! - AES-256-GCM sealing with a detached tag and a fresh IV per call
//! - Non-extractable key handles, key wrap/unwrap
//! - Identity-derived KEKs (SHA-256 + HKDF) for the pre-setup fallback
//! - Zeroizing buffers and explicit wipe
//! - Passphrase strength policy

pub mod crypto;
pub mod encoding;
pub mod error;
pub mod policy;

// Re-exports
pub use crypto::{Argon2Config, CipherSuite, KeyHandle, KeyUsage, Passphrase, SealedBox, StandardSuite};
pub use error::{KeyVaultError, Result};
pub use policy::PassphrasePolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
