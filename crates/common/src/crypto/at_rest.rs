//! At-rest encryption using AES-CBC
//!
//! Values written to local storage are encrypted with AES-CBC and PKCS#7
//! padding under a key string supplied by the caller (usually the device
//! key). The key string's UTF-8 bytes are the AES key, so it must be 16, 24
//! or 32 bytes long.
//!
//! # Blob Format
//!
//! ```text
//! base64_no_pad( iv: 16 bytes || ciphertext: 16 * n bytes )
//! ```
//!
//! # IV Policy
//!
//! With [`IvPolicy::Random`] every call draws a fresh IV. With
//! [`IvPolicy::Zero`] the IV is all zeros and encryption is fully
//! deterministic: the same key and plaintext always give the same blob. That
//! lets callers compare or look up encrypted values, at the cost of leaking
//! plaintext equality to anyone who can read the blobs.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use zeroize::Zeroizing;

use super::BASE64_LENIENT;

/// Size of the CBC initialization vector in bytes
pub const IV_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum StorageCipherError {
    #[error("invalid key length {0}, expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),
    #[error("failed to generate iv: {0}")]
    Rng(String),
    #[error("ciphertext is malformed")]
    MalformedBlob,
    #[error("decryption failed")]
    Decrypt,
    #[error("plaintext is not valid utf-8")]
    Encoding,
}

/// How the IV is chosen for each encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvPolicy {
    /// All-zero IV, deterministic output
    Zero,
    /// Fresh random IV per call
    #[default]
    Random,
}

impl IvPolicy {
    pub fn from_randomize(randomize_iv: bool) -> Self {
        if randomize_iv {
            Self::Random
        } else {
            Self::Zero
        }
    }
}

/// AES-CBC cipher bound to one storage key
pub struct AtRestCipher {
    key: Zeroizing<Vec<u8>>,
}

impl AtRestCipher {
    /// # Errors
    ///
    /// Returns [`StorageCipherError::InvalidKeyLength`] unless the key string
    /// is 16, 24 or 32 bytes of UTF-8.
    pub fn new(key: &str) -> Result<Self, StorageCipherError> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Zeroizing::new(key.as_bytes().to_vec()),
            }),
            other => Err(StorageCipherError::InvalidKeyLength(other)),
        }
    }

    /// Encrypt a string, returning the unpadded base64 blob
    pub fn encrypt(&self, plaintext: &str, policy: IvPolicy) -> Result<String, StorageCipherError> {
        let mut iv = [0u8; IV_SIZE];
        if policy == IvPolicy::Random {
            getrandom::getrandom(&mut iv).map_err(|e| StorageCipherError::Rng(e.to_string()))?;
        }

        let ciphertext = match self.key.len() {
            16 => seal::<Aes128>(&self.key, &iv, plaintext.as_bytes())?,
            24 => seal::<Aes192>(&self.key, &iv, plaintext.as_bytes())?,
            _ => seal::<Aes256>(&self.key, &iv, plaintext.as_bytes())?,
        };

        let mut blob = Vec::with_capacity(IV_SIZE + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64_LENIENT.encode(blob))
    }

    /// Decrypt a blob produced by [`AtRestCipher::encrypt`]
    ///
    /// Padded and unpadded base64 are both accepted.
    pub fn decrypt(&self, blob: &str) -> Result<String, StorageCipherError> {
        let data = BASE64_LENIENT
            .decode(blob.trim())
            .map_err(|_| StorageCipherError::MalformedBlob)?;
        if data.len() < IV_SIZE + BLOCK_SIZE || (data.len() - IV_SIZE) % BLOCK_SIZE != 0 {
            return Err(StorageCipherError::MalformedBlob);
        }

        let (iv, ciphertext) = data.split_at(IV_SIZE);
        let plaintext = match self.key.len() {
            16 => open::<Aes128>(&self.key, iv, ciphertext)?,
            24 => open::<Aes192>(&self.key, iv, ciphertext)?,
            _ => open::<Aes256>(&self.key, iv, ciphertext)?,
        };

        String::from_utf8(plaintext).map_err(|_| StorageCipherError::Encoding)
    }
}

impl std::fmt::Debug for AtRestCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AtRestCipher(AES-{})", self.key.len() * 8)
    }
}

fn seal<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, StorageCipherError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| StorageCipherError::InvalidKeyLength(key.len()))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn open<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, StorageCipherError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| StorageCipherError::InvalidKeyLength(key.len()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StorageCipherError::Decrypt)
}
