//! Session encryption using AES-GCM
//!
//! Payloads exchanged with the server after key agreement are sealed with
//! AES-GCM under the [`SharedSecret`]. The key size follows the secret: a
//! 32-byte secret (the P-256 agreement output) selects AES-256-GCM, a 16-byte
//! secret selects AES-128-GCM.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::KeyAgreementError;

/// Size of the AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;
/// Shortest blob `decrypt` will attempt: a nonce and a bare tag
pub const MIN_BLOB_SIZE: usize = NONCE_SIZE + TAG_SIZE;

const AES_128_KEY_SIZE: usize = 16;
const AES_256_KEY_SIZE: usize = 32;

/// Decryption failed
///
/// Carries no detail. A wrong key looks the same to the caller as a tampered
/// or truncated blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("decryption failed")]
pub struct DecryptionError;

/// Errors that can occur while sealing a payload
#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error("encrypt error")]
    Cipher,
    #[error("cipher produced {actual} bytes for a {plaintext} byte payload")]
    InconsistentOutput { plaintext: usize, actual: usize },
}

/// Symmetric key derived from ECDH
///
/// Holds the raw agreed secret, which is used directly as the AES key.
/// Zeroized on drop; `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub(crate) fn from_agreement(raw: &[u8]) -> Self {
        Self(raw.to_vec())
    }

    /// Wrap existing key bytes
    ///
    /// # Errors
    ///
    /// Returns an error unless the slice is 16 or 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyAgreementError> {
        match bytes.len() {
            AES_128_KEY_SIZE | AES_256_KEY_SIZE => Ok(Self(bytes.to_vec())),
            other => Err(KeyAgreementError::InvalidSecretLength(other)),
        }
    }

    /// Parse a secret from its base64 representation
    pub fn from_base64(encoded: &str) -> Result<Self, KeyAgreementError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyAgreementError::InvalidEncoding)?;
        let secret = Self::from_bytes(&bytes);
        bytes.zeroize();
        secret
    }

    /// Base64 (standard alphabet, padded, no line wraps)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encrypt a payload
    ///
    /// A fresh 12-byte nonce is drawn from the AEAD's RNG for every call. The
    /// output format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
    /// so its length is always `12 + plaintext.len() + 16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher fails or its output does not have the
    /// expected length. Neither happens with a working AES implementation.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, EncryptError> {
        let (nonce, ciphertext) = match self.0.len() {
            AES_128_KEY_SIZE => {
                let cipher =
                    Aes128Gcm::new_from_slice(&self.0).map_err(|_| EncryptError::Cipher)?;
                let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, plaintext)
                    .map_err(|_| EncryptError::Cipher)?;
                (nonce, ciphertext)
            }
            _ => {
                let cipher =
                    Aes256Gcm::new_from_slice(&self.0).map_err(|_| EncryptError::Cipher)?;
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, plaintext)
                    .map_err(|_| EncryptError::Cipher)?;
                (nonce, ciphertext)
            }
        };

        if nonce.len() != NONCE_SIZE || ciphertext.len() != plaintext.len() + TAG_SIZE {
            tracing::error!(
                nonce = nonce.len(),
                ciphertext = ciphertext.len(),
                plaintext = plaintext.len(),
                "aead output failed consistency check"
            );
            return Err(EncryptError::InconsistentOutput {
                plaintext: plaintext.len(),
                actual: nonce.len() + ciphertext.len(),
            });
        }

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);

        Ok(EncryptedBlob(out))
    }

    /// Decrypt a blob produced by [`SharedSecret::encrypt`]
    ///
    /// Blobs shorter than [`MIN_BLOB_SIZE`] are rejected before the cipher is
    /// constructed.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, DecryptionError> {
        let data = blob.as_bytes();
        if data.len() < MIN_BLOB_SIZE {
            return Err(DecryptionError);
        }

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let sealed = &data[NONCE_SIZE..];

        match self.0.len() {
            AES_128_KEY_SIZE => Aes128Gcm::new_from_slice(&self.0)
                .map_err(|_| DecryptionError)?
                .decrypt(nonce, sealed)
                .map_err(|_| DecryptionError),
            _ => Aes256Gcm::new_from_slice(&self.0)
                .map_err(|_| DecryptionError)?
                .decrypt(nonce, sealed)
                .map_err(|_| DecryptionError),
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}

/// Session ciphertext
///
/// # Wire Format
///
/// ```text
/// [ nonce: 12 bytes ][ ciphertext: n bytes ][ tag: 16 bytes ]
/// ```
///
/// Base64 encoded (standard alphabet) for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    /// Parse a blob from its transport encoding
    ///
    /// Undecodable input is reported as a [`DecryptionError`], like every
    /// other reason a blob cannot be opened.
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptionError> {
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|_| DecryptionError)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The nonce prefix, if the blob is long enough to have one
    pub fn nonce(&self) -> Option<&[u8]> {
        self.0.get(..NONCE_SIZE)
    }
}

impl From<Vec<u8>> for EncryptedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
