use clap::Args;
use common::crypto::{try_sign, verify, KeyAgreementError, SharedSecret, SignError};

/// Build a detached request signature, or check one with --verify
#[derive(Args, Debug, Clone)]
pub struct Sign {
    /// Shared secret (base64)
    #[arg(long)]
    pub key: String,

    /// Key id placed in the token header
    #[arg(long, required_unless_present = "verify")]
    pub key_id: Option<String>,

    /// Request id placed in the token header (defaults to a fresh UUID)
    #[arg(long)]
    pub request_id: Option<String>,

    /// Request body to sign
    #[arg(long, default_value = "")]
    pub payload: String,

    /// Verify this token against the payload instead of signing
    #[arg(long)]
    pub verify: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignOpError {
    #[error("invalid key: {0}")]
    Key(#[from] KeyAgreementError),
    #[error("signing failed: {0}")]
    Sign(#[from] SignError),
}

#[async_trait::async_trait]
impl crate::op::Op for Sign {
    type Error = SignOpError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret = SharedSecret::from_base64(&self.key)?;

        if let Some(token) = &self.verify {
            let header = verify(token, self.payload.as_bytes(), secret.as_bytes())?;
            return Ok(format!(
                "valid signature: kid={} requestId={}",
                header.kid, header.request_id
            ));
        }

        let request_id = self
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(try_sign(
            self.payload.as_bytes(),
            self.key_id.as_deref().unwrap_or_default(),
            &request_id,
            secret.as_bytes(),
        )?)
    }
}
