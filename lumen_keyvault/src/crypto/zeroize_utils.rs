//! Memory wiping

use zeroize::Zeroize;

/// Overwrite a buffer with zeros.
///
/// Must be called on every sensitive buffer after its last use. The write is
/// not elided by the optimiser, but copies made earlier (reallocations, swap)
/// are outside its reach.
pub fn wipe(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Zero a vector's contents and truncate it
pub fn wipe_vec(vec: &mut Vec<u8>) {
    vec.zeroize();
}

/// Byte buffer wiped on drop
#[derive(Default)]
pub struct SecureBuffer {
    data: Vec<u8>,
}

impl SecureBuffer {
    /// Take ownership of `data` without copying it
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            data: slice.to_vec(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wipe now; the buffer is empty afterwards
    pub fn wipe(&mut self) {
        self.data.zeroize();
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::ops::Deref for SecureBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer({} bytes)", self.data.len())
    }
}
