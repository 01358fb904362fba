use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::spki;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};

use super::secret::SharedSecret;

/// Name of the only curve we agree keys on
pub const CURVE_NAME: &str = "secp256r1";

/// Errors that can occur while generating keys or agreeing on a secret
#[derive(Debug, thiserror::Error)]
pub enum KeyAgreementError {
    #[error("key agreement unavailable: {0}")]
    Unavailable(String),
    #[error("peer public key is not valid base64")]
    InvalidEncoding,
    #[error("peer public key is malformed: {0}")]
    MalformedPeerKey(String),
    #[error("peer public key is not on {CURVE_NAME}")]
    CurveMismatch,
    #[error("invalid shared secret length {0}, expected 16 or 32 bytes")]
    InvalidSecretLength(usize),
}

/// Public key received from the other party
///
/// Decoded from the X.509 `SubjectPublicKeyInfo` DER form, base64 encoded
/// (standard alphabet, no line wraps). Keys on any curve other than
/// P-256 are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPublicKey(PublicKey);

impl PeerPublicKey {
    /// Parse a peer key from its base64 DER representation
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The string is not valid base64
    /// - The DER is not a `SubjectPublicKeyInfo`
    /// - The algorithm parameters name a curve other than P-256
    pub fn from_base64(encoded: &str) -> Result<Self, KeyAgreementError> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyAgreementError::InvalidEncoding)?;
        Self::from_der(&der)
    }

    /// Parse a peer key from raw `SubjectPublicKeyInfo` DER bytes
    pub fn from_der(der: &[u8]) -> Result<Self, KeyAgreementError> {
        PublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| match e {
                spki::Error::OidUnknown { .. } => KeyAgreementError::CurveMismatch,
                other => KeyAgreementError::MalformedPeerKey(other.to_string()),
            })
    }
}

/// The local party's ephemeral EC identity
///
/// The private half never leaves this struct; only the DER-encoded public
/// key is exposed. A new pair is generated per [`Session`](super::Session).
///
/// # Examples
///
/// ```ignore
/// let ours = KeyPair::generate()?;
/// let theirs = KeyPair::generate()?;
///
/// let peer = PeerPublicKey::from_base64(&theirs.export_public_key())?;
/// let secret = ours.agree(&peer);
/// ```
pub struct KeyPair {
    secret: SecretKey,
    public_der: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh P-256 key pair from the OS RNG
    ///
    /// # Errors
    ///
    /// Returns [`KeyAgreementError::Unavailable`] if the public key cannot be
    /// encoded. Callers treat this as a startup failure.
    pub fn generate() -> Result<Self, KeyAgreementError> {
        let secret = SecretKey::random(&mut OsRng);
        let public_der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| KeyAgreementError::Unavailable(e.to_string()))?
            .as_bytes()
            .to_vec();

        tracing::debug!(curve = CURVE_NAME, "generated key pair");

        Ok(Self { secret, public_der })
    }

    /// Public key as `SubjectPublicKeyInfo` DER
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Public key as base64 DER, ready to send to the peer
    pub fn export_public_key(&self) -> String {
        STANDARD.encode(&self.public_der)
    }

    /// Perform one-pass ECDH with the peer key
    ///
    /// The raw agreed secret (32 bytes for P-256) is used directly as an
    /// AES-256 key. No KDF is applied.
    pub fn agree(&self, peer: &PeerPublicKey) -> SharedSecret {
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.0.as_affine());
        SharedSecret::from_agreement(shared.raw_secret_bytes().as_slice())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("curve", &CURVE_NAME)
            .field("public", &self.export_public_key())
            .finish_non_exhaustive()
    }
}
