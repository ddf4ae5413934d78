//! Error types for the Lumen keyvault primitives

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Passphrase does not meet policy: {}", .0.join("; "))]
    WeakPassphrase(Vec<String>),

    #[error("Key derivation parameters below safety floor: {0}")]
    WeakParameters(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key usage does not permit {0}")]
    KeyUsage(&'static str),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;
