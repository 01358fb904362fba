use clap::Args;
use common::crypto::{
    DecryptionError, EncryptError, EncryptedBlob, KeyAgreementError, SharedSecret,
};

/// Encrypt a message with an agreed session secret
#[derive(Args, Debug, Clone)]
pub struct Seal {
    /// Shared secret (base64)
    #[arg(long)]
    pub key: String,

    /// Message to encrypt
    pub plaintext: String,
}

/// Decrypt a sealed message with an agreed session secret
#[derive(Args, Debug, Clone)]
pub struct Open {
    /// Shared secret (base64)
    #[arg(long)]
    pub key: String,

    /// Sealed blob (base64 nonce || ciphertext || tag)
    pub blob: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionOpError {
    #[error("invalid key: {0}")]
    Key(#[from] KeyAgreementError),
    #[error(transparent)]
    Encrypt(#[from] EncryptError),
    #[error(transparent)]
    Decrypt(#[from] DecryptionError),
    #[error("decrypted message is not utf-8")]
    NotUtf8,
}

#[async_trait::async_trait]
impl crate::op::Op for Seal {
    type Error = SessionOpError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret = SharedSecret::from_base64(&self.key)?;
        let blob = secret.encrypt(self.plaintext.as_bytes())?;
        Ok(blob.to_base64())
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Open {
    type Error = SessionOpError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret = SharedSecret::from_base64(&self.key)?;
        let blob = EncryptedBlob::from_base64(&self.blob)?;
        let plaintext = secret.decrypt(&blob)?;
        String::from_utf8(plaintext).map_err(|_| SessionOpError::NotUtf8)
    }
}
