//! Detached request signing
//!
//! Tokens follow the unencoded-payload JWS convention: the header declares
//! `"b64": false` and marks it critical, the payload is signed as raw bytes
//! and left out of the token entirely. The verifier supplies the body it
//! received out of band.
//!
//! # Token Format
//!
//! ```text
//! base64url(header_json) + ".." + base64url(hmac_sha256(key, signing_input))
//!
//! signing_input = base64url(header_json) || b"." || payload
//! ```
//!
//! Both segments are base64url without padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the detached token on outbound requests
pub const SIGNATURE_HEADER: &str = "X-JWS-Signature";
/// The only algorithm we produce or accept
pub const ALGORITHM: &str = "HS256";

const UNENCODED_PAYLOAD: &str = "b64";

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("signing key is empty")]
    MissingKey,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("failed to encode token header: {0}")]
    Header(#[from] serde_json::Error),
    #[error("token is not a detached token")]
    MalformedToken,
    #[error("unsupported token header: {0}")]
    UnsupportedHeader(String),
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Protected header of a detached token
///
/// Field order is part of the format: the header is signed in its encoded
/// form, so it must serialize identically on every platform that signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub kid: String,
    pub b64: bool,
    pub crit: Vec<String>,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl TokenHeader {
    pub fn new(key_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            kid: key_id.into(),
            b64: false,
            crit: vec![UNENCODED_PAYLOAD.to_string()],
            request_id: request_id.into(),
        }
    }

    /// base64url(JSON) of the header, no padding
    pub fn encode(&self) -> Result<String, SignError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn check_supported(&self) -> Result<(), SignError> {
        if self.alg != ALGORITHM {
            return Err(SignError::UnsupportedHeader(format!("alg {}", self.alg)));
        }
        if self.b64 || !self.crit.iter().any(|c| c == UNENCODED_PAYLOAD) {
            return Err(SignError::UnsupportedHeader(
                "payload must be detached and unencoded".to_string(),
            ));
        }
        Ok(())
    }
}

/// The exact byte sequence covered by the MAC
///
/// Built from the already-encoded header so signer and verifier hash the
/// same bytes regardless of how either side formats JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningInput {
    encoded_header: String,
    bytes: Vec<u8>,
}

impl SigningInput {
    pub fn new(header: &TokenHeader, payload: &[u8]) -> Result<Self, SignError> {
        Ok(Self::from_encoded_header(header.encode()?, payload))
    }

    fn from_encoded_header(encoded_header: String, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(encoded_header.len() + 1 + payload.len());
        bytes.extend_from_slice(encoded_header.as_bytes());
        bytes.push(b'.');
        bytes.extend_from_slice(payload);
        Self {
            encoded_header,
            bytes,
        }
    }

    pub fn encoded_header(&self) -> &str {
        &self.encoded_header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn mac(&self, key: &[u8]) -> Result<HmacSha256, SignError> {
        if key.is_empty() {
            return Err(SignError::MissingKey);
        }
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|e| SignError::InvalidKey(e.to_string()))?;
        mac.update(&self.bytes);
        Ok(mac)
    }
}

/// Build a detached token, reporting why signing failed
///
/// # Errors
///
/// Returns [`SignError::MissingKey`] for an empty key, which is what callers
/// hold before key agreement has completed.
pub fn try_sign(
    payload: &[u8],
    key_id: &str,
    request_id: &str,
    signing_key: &[u8],
) -> Result<String, SignError> {
    let input = SigningInput::new(&TokenHeader::new(key_id, request_id), payload)?;
    let signature = input.mac(signing_key)?.finalize().into_bytes();

    Ok(format!(
        "{}..{}",
        input.encoded_header(),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Build a detached token for a request body
///
/// Returns an empty string when signing is unavailable. Whether to send the
/// request unsigned is the caller's decision.
///
/// # Examples
///
/// ```ignore
/// let token = sign(body, "kid-1", &request_id, session.signing_key());
/// if token.is_empty() {
///     // no key yet, request goes out with an empty signature header
/// }
/// ```
pub fn sign(payload: &[u8], key_id: &str, request_id: &str, signing_key: &[u8]) -> String {
    match try_sign(payload, key_id, request_id, signing_key) {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(key_id, request_id, error = %e, "request signing unavailable");
            String::new()
        }
    }
}

fn split_token(token: &str) -> Result<(&str, &str), SignError> {
    let (header, signature) = token.split_once("..").ok_or(SignError::MalformedToken)?;
    if header.is_empty() || signature.is_empty() || header.contains('.') || signature.contains('.')
    {
        return Err(SignError::MalformedToken);
    }
    Ok((header, signature))
}

/// Parse the protected header of a detached token without checking the MAC
pub fn decode_header(token: &str) -> Result<TokenHeader, SignError> {
    let (header, _) = split_token(token)?;
    let json = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| SignError::MalformedToken)?;
    serde_json::from_slice(&json).map_err(|_| SignError::MalformedToken)
}

/// Check a detached token against the body it was sent with
///
/// The MAC is recomputed over the header exactly as it appears in the token
/// and compared in constant time.
pub fn verify(token: &str, payload: &[u8], signing_key: &[u8]) -> Result<TokenHeader, SignError> {
    let header = decode_header(token)?;
    header.check_supported()?;

    let (encoded_header, signature) = split_token(token)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| SignError::MalformedToken)?;

    SigningInput::from_encoded_header(encoded_header.to_string(), payload)
        .mac(signing_key)?
        .verify_slice(&signature)
        .map_err(|_| SignError::SignatureMismatch)?;

    Ok(header)
}
