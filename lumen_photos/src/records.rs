//! Persisted and in-transit record shapes
//!
//! Payload wire format:
//! ```text
//! [MAGIC 8B]["LUMNPHOT"]
//! [VERSION 1B][0x01]
//! [IV 12B][random]
//! [CIPHERTEXT variable][AES-256-GCM encrypted]
//! [TAG 16B][GCM auth tag]
//! ```

use chrono::{DateTime, Utc};
use lumen_keyvault::crypto::{NONCE_LEN, TAG_LEN};
use lumen_keyvault::encoding::{self, base64_array, base64_bytes};
use lumen_keyvault::{Argon2Config, KeyVaultError, SealedBox};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Field of the user document holding the encryption block
pub const USER_ENCRYPTION_FIELD: &str = "encryption";

/// Magic bytes identifying a Lumen encrypted payload
const MAGIC: &[u8; 8] = b"LUMNPHOT";

/// Current payload format version
const PAYLOAD_VERSION: u8 = 0x01;

/// Header size: MAGIC(8) + VERSION(1) + IV(12)
const HEADER_SIZE: usize = 8 + 1 + NONCE_LEN;

/// Minimum valid payload size (empty photo)
const MIN_PAYLOAD_SIZE: usize = HEADER_SIZE + TAG_LEN;

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// Master key sealed under a passphrase-derived KEK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedMasterKey {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub auth_tag: String,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl SealedMasterKey {
    pub fn new(sealed: &SealedBox, salt: &[u8], version: u32) -> Self {
        Self {
            ciphertext: encoding::encode(&sealed.ciphertext),
            iv: encoding::encode(&sealed.iv),
            salt: encoding::encode(salt),
            auth_tag: encoding::encode(&sealed.auth_tag),
            created_at: Utc::now(),
            version,
        }
    }

    /// Decode the AEAD parts. Bad base64 or lengths fail like a bad tag.
    pub fn sealed_box(&self) -> Result<SealedBox, KeyVaultError> {
        let ciphertext = encoding::decode(&self.ciphertext)?;
        let iv = encoding::decode(&self.iv)?;
        let tag = encoding::decode(&self.auth_tag)?;
        SealedBox::from_parts(ciphertext, &iv, &tag)
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>, KeyVaultError> {
        encoding::decode(&self.salt)
    }
}

/// Non-secret facts about the master key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyMetadata {
    pub key_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub algorithm: String,
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl MasterKeyMetadata {
    pub fn new(key_id: String, version: u32, algorithm: &str, kdf: &Argon2Config) -> Self {
        let now = Utc::now();
        Self {
            key_id,
            version,
            created_at: now,
            last_used: now,
            algorithm: algorithm.to_string(),
            memory_cost: kdf.memory_cost_kib,
            iterations: kdf.time_cost,
            parallelism: kdf.parallelism,
        }
    }

    /// The parameters the sealed key was derived with
    pub fn kdf_params(&self) -> Argon2Config {
        Argon2Config {
            memory_cost_kib: self.memory_cost,
            time_cost: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

/// `{ masterKey, metadata }` stored on the user document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEncryptionBlock {
    pub master_key: SealedMasterKey,
    pub metadata: MasterKeyMetadata,
}

// ---------------------------------------------------------------------------
// Album key
// ---------------------------------------------------------------------------

/// Which KEK wrapped an album key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyWrapping {
    /// Sealed under the passphrase-protected master key
    MasterKey,
    /// Sealed under a key anyone can derive from the owner's principal id
    IdentityDerived,
}

impl KeyWrapping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterKey => "masterKey",
            Self::IdentityDerived => "identityDerived",
        }
    }
}

/// Album key sealed under a KEK, stored per album
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedAlbumKey {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub album_id: String,
    pub wrapped_by: KeyWrapping,
    pub created_at: DateTime<Utc>,
}

impl SealedAlbumKey {
    pub fn new(album_id: &str, sealed: &SealedBox, wrapped_by: KeyWrapping) -> Self {
        Self {
            ciphertext: encoding::encode(&sealed.ciphertext),
            iv: encoding::encode(&sealed.iv),
            auth_tag: encoding::encode(&sealed.auth_tag),
            album_id: album_id.to_string(),
            wrapped_by,
            created_at: Utc::now(),
        }
    }

    pub fn sealed_box(&self) -> Result<SealedBox, KeyVaultError> {
        let ciphertext = encoding::decode(&self.ciphertext)?;
        let iv = encoding::decode(&self.iv)?;
        let tag = encoding::decode(&self.auth_tag)?;
        SealedBox::from_parts(ciphertext, &iv, &tag)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Encrypted photo or thumbnail bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_array")]
    pub iv: [u8; NONCE_LEN],
    #[serde(with = "base64_array")]
    pub auth_tag: [u8; TAG_LEN],
}

impl From<SealedBox> for EncryptedPayload {
    fn from(sealed: SealedBox) -> Self {
        Self {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.auth_tag,
        }
    }
}

impl EncryptedPayload {
    pub fn to_sealed_box(&self) -> SealedBox {
        SealedBox {
            ciphertext: self.ciphertext.clone(),
            iv: self.iv,
            auth_tag: self.auth_tag,
        }
    }

    /// Serialize for upload to the object store
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(MIN_PAYLOAD_SIZE + self.ciphertext.len());
        output.extend_from_slice(MAGIC);
        output.push(PAYLOAD_VERSION);
        output.extend_from_slice(&self.iv);
        output.extend_from_slice(&self.ciphertext);
        output.extend_from_slice(&self.auth_tag);
        output
    }

    /// Parse a downloaded object. Authentication happens on decrypt.
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.len() < MIN_PAYLOAD_SIZE {
            return Err(VaultError::InvalidPayloadFormat("payload too small".into()));
        }

        if &data[0..8] != MAGIC {
            return Err(VaultError::InvalidPayloadFormat("invalid magic bytes".into()));
        }

        let version = data[8];
        if version != PAYLOAD_VERSION {
            return Err(VaultError::InvalidPayloadFormat(format!(
                "unsupported version: {}",
                version
            )));
        }

        let tag_start = data.len() - TAG_LEN;
        let mut iv = [0u8; NONCE_LEN];
        iv.copy_from_slice(&data[9..HEADER_SIZE]);
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&data[tag_start..]);

        Ok(Self {
            ciphertext: data[HEADER_SIZE..tag_start].to_vec(),
            iv,
            auth_tag,
        })
    }
}
