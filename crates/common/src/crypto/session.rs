use super::keys::{KeyAgreementError, KeyPair, PeerPublicKey};
use super::secret::{DecryptionError, EncryptError, EncryptedBlob, SharedSecret};

/// Errors from session operations that need an agreed secret
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no shared secret, run key agreement first")]
    NoSharedSecret,
    #[error(transparent)]
    Encrypt(#[from] EncryptError),
    #[error(transparent)]
    Decrypt(#[from] DecryptionError),
}

/// Key agreement state for one client/server relationship
///
/// Owns exactly one local key pair and at most one shared secret. There is
/// no global key state: whoever needs to encrypt or sign holds the `Session`
/// (or a reference to it). Mutating operations take `&mut self`, so sharing a
/// session across threads requires an explicit lock around it.
///
/// Lifecycle:
/// - [`Session::generate`] creates the key pair, no secret yet
/// - [`Session::derive_shared_secret`] stores a secret, replacing any previous one
/// - [`Session::regenerate`] swaps the key pair and drops the secret
#[derive(Debug)]
pub struct Session {
    key_pair: KeyPair,
    shared_secret: Option<SharedSecret>,
}

impl Session {
    /// Start a session with a fresh key pair
    pub fn generate() -> Result<Self, KeyAgreementError> {
        Ok(Self {
            key_pair: KeyPair::generate()?,
            shared_secret: None,
        })
    }

    /// Replace the key pair
    ///
    /// Any previously derived secret belonged to the old pair and is dropped;
    /// callers must agree again before encrypting or signing. If generation
    /// fails the session keeps no usable secret.
    pub fn regenerate(&mut self) -> Result<(), KeyAgreementError> {
        self.shared_secret = None;
        self.key_pair = KeyPair::generate()?;
        Ok(())
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Local public key, base64 `SubjectPublicKeyInfo` DER
    pub fn export_public_key(&self) -> String {
        self.key_pair.export_public_key()
    }

    /// Agree on a secret with the peer and keep it
    ///
    /// The new secret unconditionally replaces the stored one on success; on
    /// failure the previous secret is left untouched.
    pub fn derive_shared_secret(
        &mut self,
        peer_public_key: &str,
    ) -> Result<&SharedSecret, KeyAgreementError> {
        let peer = PeerPublicKey::from_base64(peer_public_key)?;
        let secret = self.key_pair.agree(&peer);

        tracing::debug!(bytes = secret.len(), "derived shared secret");

        Ok(self.shared_secret.insert(secret))
    }

    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        self.shared_secret.as_ref()
    }

    /// Key for request signing: the raw shared secret, or empty before agreement
    ///
    /// The signer reports an empty key as unavailable, so requests assembled
    /// before agreement carry an empty signature header.
    pub fn signing_key(&self) -> &[u8] {
        self.shared_secret
            .as_ref()
            .map(SharedSecret::as_bytes)
            .unwrap_or_default()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, SessionError> {
        let secret = self.shared_secret.as_ref().ok_or(SessionError::NoSharedSecret)?;
        Ok(secret.encrypt(plaintext)?)
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, SessionError> {
        let secret = self.shared_secret.as_ref().ok_or(SessionError::NoSharedSecret)?;
        Ok(secret.decrypt(blob)?)
    }
}
