//! Photo payload encryption for Lumen Photos
//!
//! Photos and thumbnails are sealed with their album key, AAD
//! `lumen:payload:<albumId>`. On disk and in the object store a payload uses
//! the [`EncryptedPayload`] wire format.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use lumen_keyvault::crypto::SecureBuffer;
use lumen_keyvault::CipherSuite;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::album::AlbumKeyManager;
use crate::cache::KeySession;
use crate::error::{VaultError, VaultResult};
use crate::records::EncryptedPayload;

fn payload_aad(album_id: &str) -> Vec<u8> {
    format!("lumen:payload:{}", album_id).into_bytes()
}

// ---------------------------------------------------------------------------
// Ephemeral handles
// ---------------------------------------------------------------------------

/// Opaque reference to decrypted bytes held by a [`HandleRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoHandle(Uuid);

impl std::fmt::Display for PhotoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "photo-{}", self.0)
    }
}

/// Decrypted photos waiting to be displayed. Released buffers are wiped.
#[derive(Default)]
pub struct HandleRegistry {
    buffers: Mutex<HashMap<PhotoHandle, SecureBuffer>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register only if `session` was not cleared since `epoch`. The check
    /// runs under the registry lock, so a lock followed by
    /// [`HandleRegistry::release_all`] never misses a buffer.
    fn register_if_current(
        &self,
        mut buffer: SecureBuffer,
        session: &KeySession,
        epoch: u64,
    ) -> VaultResult<PhotoHandle> {
        let mut buffers = self.buffers.lock();
        if !session.is_current(epoch) {
            buffer.wipe();
            return Err(VaultError::SessionLocked);
        }
        let handle = PhotoHandle(Uuid::new_v4());
        buffers.insert(handle, buffer);
        Ok(handle)
    }

    /// Copy of the bytes behind `handle`
    pub fn read(&self, handle: &PhotoHandle) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.buffers
            .lock()
            .get(handle)
            .map(|buffer| Zeroizing::new(buffer.as_slice().to_vec()))
            .ok_or_else(|| VaultError::HandleNotFound(handle.to_string()))
    }

    /// Wipe and forget one buffer. Returns `false` if it was already gone.
    pub fn release(&self, handle: &PhotoHandle) -> bool {
        match self.buffers.lock().remove(handle) {
            Some(mut buffer) => {
                buffer.wipe();
                true
            }
            None => false,
        }
    }

    /// Wipe every buffer
    pub fn release_all(&self) -> usize {
        let mut buffers = self.buffers.lock();
        let count = buffers.len();
        for (_, mut buffer) in buffers.drain() {
            buffer.wipe();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// PhotoCipher
// ---------------------------------------------------------------------------

/// Seals and opens photo payloads with album keys
pub struct PhotoCipher {
    albums: Arc<AlbumKeyManager>,
    suite: Arc<dyn CipherSuite>,
    handles: HandleRegistry,
}

impl PhotoCipher {
    pub fn new(albums: Arc<AlbumKeyManager>, suite: Arc<dyn CipherSuite>) -> Self {
        Self {
            albums,
            suite,
            handles: HandleRegistry::new(),
        }
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Encrypt photo bytes with the album key
    pub async fn encrypt_payload(&self, album_id: &str, plaintext: &[u8]) -> VaultResult<EncryptedPayload> {
        let key = self.albums.resolve_album_key(album_id).await?;
        let sealed = self.suite.seal(plaintext, &key, &payload_aad(album_id))?;
        Ok(sealed.into())
    }

    /// Decrypt photo bytes. A tampered payload or wrong album fails with
    /// [`VaultError::AuthenticationFailed`]; a lock while decrypting fails
    /// with [`VaultError::SessionLocked`].
    pub async fn decrypt_payload(
        &self,
        album_id: &str,
        payload: &EncryptedPayload,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        let epoch = self.albums.session().epoch();
        self.decrypt_at(album_id, payload, epoch).await
    }

    async fn decrypt_at(
        &self,
        album_id: &str,
        payload: &EncryptedPayload,
        epoch: u64,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        let key = self.albums.resolve_album_key(album_id).await?;
        let plaintext = self
            .suite
            .open(&payload.to_sealed_box(), &key, &payload_aad(album_id))?;
        if !self.albums.session().is_current(epoch) {
            // Dropping the plaintext wipes it
            return Err(VaultError::SessionLocked);
        }
        Ok(plaintext)
    }

    /// Decrypt into a registry buffer and hand back only a handle
    pub async fn decrypt_to_ephemeral_handle(
        &self,
        album_id: &str,
        payload: &EncryptedPayload,
    ) -> VaultResult<PhotoHandle> {
        let session = self.albums.session();
        let epoch = session.epoch();
        let mut plaintext = self.decrypt_at(album_id, payload, epoch).await?;
        let buffer = SecureBuffer::from_vec(std::mem::take(&mut *plaintext));
        self.handles.register_if_current(buffer, session, epoch)
    }

    pub fn read_handle(&self, handle: &PhotoHandle) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.handles.read(handle)
    }

    pub fn release(&self, handle: &PhotoHandle) -> bool {
        self.handles.release(handle)
    }

    pub fn release_all(&self) -> usize {
        self.handles.release_all()
    }

    /// Encrypt a file into the payload wire format
    pub async fn encrypt_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        album_id: &str,
        input_path: P,
        output_path: Q,
    ) -> VaultResult<usize> {
        let plaintext = Zeroizing::new(fs::read(input_path.as_ref()).await?);
        let payload = self.encrypt_payload(album_id, &plaintext).await?;

        let bytes = payload.to_bytes();
        fs::write(output_path.as_ref(), &bytes).await?;
        Ok(bytes.len())
    }

    /// Decrypt a wire-format file
    pub async fn decrypt_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        album_id: &str,
        input_path: P,
        output_path: Q,
    ) -> VaultResult<usize> {
        let data = fs::read(input_path.as_ref()).await?;
        let payload = EncryptedPayload::from_bytes(&data)?;
        let plaintext = self.decrypt_payload(album_id, &payload).await?;

        fs::write(output_path.as_ref(), plaintext.as_slice()).await?;
        Ok(plaintext.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::album::tests::{setup_with, setup_with_suite, CountingSuite, Setup};
    use crate::master::tests::{pass, test_config};
    use crate::store::MemoryStore;
    use tempfile::tempdir;

    struct Fixture {
        setup: Setup,
        cipher: PhotoCipher,
    }

    async fn fixture() -> Fixture {
        let setup = setup_with(Arc::new(MemoryStore::new()), test_config());
        setup.master.initialize(&pass("Correct-Horse9!")).await.unwrap();
        setup.albums.provision_album_key("A1").await.unwrap();
        let cipher = PhotoCipher::new(setup.albums.clone(), setup.suite.clone());
        Fixture { setup, cipher }
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_payload() {
        let f = fixture().await;
        let payload = f.cipher.encrypt_payload("A1", &[1, 2, 3]).await.unwrap();
        let plaintext = f.cipher.decrypt_payload("A1", &payload).await.unwrap();
        assert_eq!(plaintext.as_slice(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_bit_flips_fail() {
        let f = fixture().await;
        let payload = f.cipher.encrypt_payload("A1", b"jpeg bytes").await.unwrap();

        let mut flipped = payload.clone();
        flipped.ciphertext[0] ^= 0x01;
        let result = f.cipher.decrypt_payload("A1", &flipped).await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));

        let mut flipped = payload.clone();
        flipped.iv[11] ^= 0x80;
        let result = f.cipher.decrypt_payload("A1", &flipped).await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));

        let mut flipped = payload;
        flipped.auth_tag[0] ^= 0x01;
        let err = f.cipher.decrypt_payload("A1", &flipped).await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailed));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_payload_bound_to_album() {
        let f = fixture().await;
        f.setup.albums.provision_album_key("A9").await.unwrap();

        let payload = f.cipher.encrypt_payload("A1", b"photo").await.unwrap();
        let result = f.cipher.decrypt_payload("A9", &payload).await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_fresh_iv_per_call() {
        let f = fixture().await;
        let a = f.cipher.encrypt_payload("A1", b"same").await.unwrap();
        let b = f.cipher.encrypt_payload("A1", b"same").await.unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_decrypt_after_lock_is_refused() {
        let f = fixture().await;
        let payload = f.cipher.encrypt_payload("A1", b"photo").await.unwrap();

        f.setup.master.lock();
        let result = f.cipher.decrypt_payload("A1", &payload).await;
        assert!(matches!(result, Err(VaultError::SessionLocked)));
    }

    #[tokio::test]
    async fn test_ephemeral_handles() {
        let f = fixture().await;
        let payload = f.cipher.encrypt_payload("A1", b"thumbnail").await.unwrap();

        let handle = f.cipher.decrypt_to_ephemeral_handle("A1", &payload).await.unwrap();
        assert_eq!(f.cipher.read_handle(&handle).unwrap().as_slice(), b"thumbnail");

        assert!(f.cipher.release(&handle));
        assert!(!f.cipher.release(&handle));
        assert!(matches!(
            f.cipher.read_handle(&handle),
            Err(VaultError::HandleNotFound(_))
        ));

        f.cipher.decrypt_to_ephemeral_handle("A1", &payload).await.unwrap();
        f.cipher.decrypt_to_ephemeral_handle("A1", &payload).await.unwrap();
        assert_eq!(f.cipher.release_all(), 2);
        assert!(f.cipher.handles().is_empty());
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let f = fixture().await;
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        let sealed = dir.path().join("photo.lumen");
        let output = dir.path().join("photo.out.jpg");

        std::fs::write(&input, b"FAKE JPEG DATA 1234567890").unwrap();
        f.cipher.encrypt_file("A1", &input, &sealed).await.unwrap();

        let on_disk = std::fs::read(&sealed).unwrap();
        assert_eq!(&on_disk[0..8], b"LUMNPHOT");

        f.cipher.decrypt_file("A1", &sealed, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"FAKE JPEG DATA 1234567890");
    }

    /// Identity-wrapped album whose payload opens take 200ms
    async fn slow_open_cipher() -> (Setup, Arc<PhotoCipher>) {
        let suite = CountingSuite::with_payload_open_delay(Duration::from_millis(200));
        let setup = setup_with_suite(Arc::new(MemoryStore::new()), test_config(), suite);
        setup.albums.provision_album_key("A2").await.unwrap();
        let cipher = Arc::new(PhotoCipher::new(setup.albums.clone(), setup.suite.clone()));
        (setup, cipher)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_during_decrypt_leaves_no_handle() {
        let (setup, cipher) = slow_open_cipher().await;
        let payload = cipher.encrypt_payload("A2", b"secret photo").await.unwrap();

        let pending = {
            let cipher = cipher.clone();
            tokio::spawn(async move { cipher.decrypt_to_ephemeral_handle("A2", &payload).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        setup.master.lock();
        cipher.release_all();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(VaultError::SessionLocked)));
        assert!(cipher.handles().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_during_decrypt_withholds_plaintext() {
        let (setup, cipher) = slow_open_cipher().await;
        let payload = cipher.encrypt_payload("A2", b"secret photo").await.unwrap();

        let pending = {
            let cipher = cipher.clone();
            tokio::spawn(async move { cipher.decrypt_payload("A2", &payload).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        setup.master.lock();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(VaultError::SessionLocked)));
    }
}
