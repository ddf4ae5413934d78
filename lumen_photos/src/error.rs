//! Lumen Photos - Error Types

use lumen_keyvault::KeyVaultError;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CALLER INPUT
    // ═══════════════════════════════════════════════════════════════

    #[error("Passphrase does not meet policy: {}", .0.join("; "))]
    WeakPassphrase(Vec<String>),

    #[error("Key derivation parameters rejected: {0}")]
    WeakParameters(String),

    // ═══════════════════════════════════════════════════════════════
    // IDENTITY / AUTHORIZATION
    // ═══════════════════════════════════════════════════════════════

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    // ═══════════════════════════════════════════════════════════════
    // KEY LIFECYCLE
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption is not set up for this account")]
    KeyNotFound,

    #[error("Encryption is already set up for this account")]
    AlreadyInitialized,

    #[error("No key record for album: {0}")]
    AlbumKeyNotFound(String),

    #[error("Album already has a key: {0}")]
    AlbumKeyExists(String),

    #[error("Session is locked")]
    SessionLocked,

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO
    // ═══════════════════════════════════════════════════════════════

    /// Wrong passphrase and corrupted record share this one message.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Authentication failed - data corrupted or tampered")]
    AuthenticationFailed,

    #[error("Crypto error: {0}")]
    Crypto(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE / RUNTIME
    // ═══════════════════════════════════════════════════════════════

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid payload format: {0}")]
    InvalidPayloadFormat(String),

    #[error("Photo handle not found: {0}")]
    HandleNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed
                | VaultError::AuthenticationFailed
                | VaultError::AccessDenied(_)
        )
    }

    /// Safe to retry once the caller has fixed the transient condition
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::SessionLocked | VaultError::Timeout(_) | VaultError::Storage(_)
        )
    }

    /// Check if the UI can show a "cannot display" state instead of failing
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailed
                | VaultError::SessionLocked
                | VaultError::InvalidPayloadFormat(_)
                | VaultError::HandleNotFound(_)
        )
    }

    /// Message suitable for end users
    pub fn user_message(&self) -> &'static str {
        match self {
            VaultError::WeakPassphrase(_) => "Choose a stronger passphrase.",
            VaultError::WeakParameters(_) => "Encryption settings are too weak.",
            VaultError::NotAuthenticated => "Please sign in.",
            VaultError::AccessDenied(_) => "You do not have access to this album.",
            VaultError::KeyNotFound => "Encryption is not set up yet.",
            VaultError::AlreadyInitialized => "Encryption is already set up.",
            VaultError::AlbumKeyNotFound(_) => "Cannot access this album.",
            VaultError::AlbumKeyExists(_) => "This album is already encrypted.",
            VaultError::SessionLocked => "Your session is locked. Unlock to continue.",
            VaultError::DecryptionFailed | VaultError::AuthenticationFailed => {
                "Unable to decrypt. Check your passphrase or try again later."
            }
            VaultError::InvalidPayloadFormat(_) | VaultError::HandleNotFound(_) => {
                "This photo cannot be displayed."
            }
            VaultError::Timeout(_) | VaultError::Storage(_) | VaultError::Io(_) => {
                "Storage is unavailable. Try again."
            }
            VaultError::Crypto(_) | VaultError::Serialization(_) | VaultError::Config(_) => {
                "Something went wrong."
            }
        }
    }
}

impl From<KeyVaultError> for VaultError {
    fn from(e: KeyVaultError) -> Self {
        match e {
            KeyVaultError::WeakPassphrase(reasons) => VaultError::WeakPassphrase(reasons),
            KeyVaultError::WeakParameters(msg) => VaultError::WeakParameters(msg),
            KeyVaultError::AuthenticationFailed => VaultError::AuthenticationFailed,
            other => VaultError::Crypto(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyvault_errors_map() {
        assert!(matches!(
            VaultError::from(KeyVaultError::AuthenticationFailed),
            VaultError::AuthenticationFailed
        ));
        assert!(matches!(
            VaultError::from(KeyVaultError::WeakPassphrase(vec!["short".into()])),
            VaultError::WeakPassphrase(_)
        ));
        assert!(matches!(
            VaultError::from(KeyVaultError::KeyUsage("encrypt")),
            VaultError::Crypto(_)
        ));
    }

    #[test]
    fn test_decryption_message_is_generic() {
        assert_eq!(VaultError::DecryptionFailed.to_string(), "Decryption failed");
        assert_eq!(
            VaultError::DecryptionFailed.user_message(),
            VaultError::AuthenticationFailed.user_message()
        );
    }

    #[test]
    fn test_classification() {
        assert!(VaultError::SessionLocked.is_retryable());
        assert!(!VaultError::WeakPassphrase(vec![]).is_retryable());
        assert!(VaultError::AuthenticationFailed.is_recoverable());
        assert!(VaultError::DecryptionFailed.is_security_critical());
    }
}
