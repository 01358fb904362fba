/**
 * Cryptographic types and operations.
 *  - Ephemeral P-256 key agreement
 *  - AES-GCM session encryption
 *  - Detached HMAC-SHA256 request signing
 *  - AES-CBC encryption at rest
 */
pub mod crypto;
/**
 * Encrypted local persistence.
 *  A key/value store on top of the at-rest
 *  cipher, keyed by the device by default.
 */
pub mod storage;
/**
 * Certificate-pinned HTTP transport.
 *  Validates, signs and dispatches requests,
 *  normalizing responses into one result shape.
 */
pub mod transport;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::build_info;
    pub use crate::crypto::{
        AtRestCipher, EncryptedBlob, IvPolicy, KeyAgreementError, Session, SharedSecret,
    };
    pub use crate::storage::{device_key, SecureStore};
    pub use crate::transport::{FetchError, FetchResponse, RequestOptions, Transport};
    pub use crate::version::BuildInfo;
}
