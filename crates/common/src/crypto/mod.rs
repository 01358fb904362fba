//! Cryptographic primitives for tether
//!
//! This module composes audited primitives into the protocol pieces a mobile
//! client needs to talk to its server without trusting the transport alone:
//!
//! - **Key Agreement**: ephemeral P-256 key pairs, X.509 public key export and
//!   one-pass ECDH against a peer key
//! - **Session Encryption**: AES-GCM over the agreed secret, framed as
//!   `nonce || ciphertext || tag`
//! - **Request Signing**: HMAC-SHA256 detached tokens (`<header>..<signature>`)
//!   binding a request body to a key id and request id
//! - **At-Rest Encryption**: AES-CBC for local persistence with a selectable
//!   IV policy
//!
//! # Key Agreement Protocol
//!
//! 1. Each side generates a key pair and exports its public key
//!    (SubjectPublicKeyInfo DER, base64)
//! 2. Public keys are exchanged out of band (usually over a plain API call)
//! 3. Each side performs ECDH with its private key and the peer's public key
//! 4. The raw x-coordinate of the agreed point is used directly as the AES key
//!
//! NOTE: there is no KDF after step 4. Servers expect the raw secret as the
//! key, which leaves less margin than a hashed derivation.
//!
//! All key state lives in an explicit [`Session`] owned by the caller; nothing
//! in this module holds process-wide mutable state.

mod at_rest;
mod keys;
mod secret;
mod session;
mod signer;

pub use at_rest::{AtRestCipher, IvPolicy, StorageCipherError, IV_SIZE};
pub use keys::{KeyAgreementError, KeyPair, PeerPublicKey, CURVE_NAME};
pub use secret::{
    DecryptionError, EncryptError, EncryptedBlob, SharedSecret, MIN_BLOB_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use session::{Session, SessionError};
pub use signer::{
    decode_header, sign, try_sign, verify, SignError, SigningInput, TokenHeader, ALGORITHM,
    SIGNATURE_HEADER,
};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Standard-alphabet base64 that decodes both padded and unpadded input.
///
/// Ciphertext produced by older clients carries `=` padding while the at-rest
/// format omits it; readers accept either.
pub(crate) const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
