//! # Lumen Photos
//!
//! Client-side envelope encryption for shared photo albums.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LUMEN PHOTOS                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  SESSION    │  │  MASTER KEY │  │  ALBUM KEY      │  │
//! │  │  GUARD      │─►│  MANAGER    │─►│  MANAGER        │  │
//! │  └─────────────┘  └──────┬──────┘  └────────┬────────┘  │
//! │                          │                   │           │
//! │  ┌───────────────────────┴───────────────────┴────────┐ │
//! │  │            KEY SESSION (cache, epoch, lock)         │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! │                                                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐  │
//! │  │  PHOTO      │  │  DOCUMENT   │  │  LUMEN_KEYVAULT │  │
//! │  │  CIPHER     │  │  STORE      │  │  PRIMITIVES     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Master key sealed under an Argon2id passphrase KEK
//! - One AES-256-GCM key per album, wrapped by the master key
//! - Every sealed record bound to its owner or album through AAD
//! - Unwrapped keys live only in the session cache and are wiped on lock

pub mod album;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod master;
pub mod photo_crypto;
pub mod records;
pub mod session_guard;
pub mod sqlite_store;
pub mod store;

pub use album::AlbumKeyManager;
pub use api::{PhotoVaultApi, VaultStatus};
pub use cache::KeySession;
pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use lumen_keyvault::Passphrase;
pub use master::{MasterKeyManager, MasterKeyState};
pub use photo_crypto::{HandleRegistry, PhotoCipher, PhotoHandle};
pub use records::{EncryptedPayload, KeyWrapping, SealedAlbumKey, SealedMasterKey};
pub use session_guard::SessionGuard;
pub use sqlite_store::SqliteStore;
pub use store::{DocumentStore, IdentityProvider, MemoryStore, StaticIdentity};

/// Lumen Photos version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
