use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 rounds. Blobs carry no iteration count, so changing this
/// orphans every existing vault.
pub const KDF_ITERATIONS: u32 = 250_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Covers wrong passwords, truncated blobs, bad base64 and tag mismatches alike.
    #[error("incorrect password or corrupted vault")]
    Authentication,

    #[error("failed to encrypt data")]
    Encryption,
}

/// Password-based AES-256-GCM.
///
/// Blob layout: `base64(salt[16] || nonce[12] || ciphertext || tag[16])`.
#[derive(Debug, Clone)]
pub struct VaultCipher {
    iterations: u32,
}

impl Default for VaultCipher {
    fn default() -> Self {
        VaultCipher {
            iterations: KDF_ITERATIONS,
        }
    }
}

impl VaultCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap key stretching for unit tests only.
    #[cfg(test)]
    pub(crate) fn with_iterations(iterations: u32) -> Self {
        VaultCipher { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut key[..]);
        key
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|_| CipherError::Encryption)?;
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| CipherError::Encryption)?;

        let key = self.derive_key(password, &salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CipherError::Encryption)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CipherError::Encryption)?;

        let mut data = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        data.extend_from_slice(&salt);
        data.extend_from_slice(&nonce_bytes);
        data.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(data))
    }

    pub fn decrypt(&self, blob: &str, password: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let data = STANDARD
            .decode(blob.trim())
            .map_err(|_| CipherError::Authentication)?;

        if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CipherError::Authentication);
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(password, salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CipherError::Authentication)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        Ok(Zeroizing::new(plaintext))
    }
}
