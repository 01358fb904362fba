use clap::Args;
use common::crypto::{KeyAgreementError, Session};

#[derive(Args, Debug, Clone)]
pub struct Handshake {
    /// Peer public key (base64 SubjectPublicKeyInfo DER)
    #[arg(long)]
    pub peer: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[from] KeyAgreementError),
}

#[async_trait::async_trait]
impl crate::op::Op for Handshake {
    type Error = HandshakeError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut session = Session::generate()?;
        let mut output = format!("public key: {}", session.export_public_key());

        if let Some(peer) = &self.peer {
            let secret = session.derive_shared_secret(peer)?;
            output.push_str(&format!("\nshared secret: {}", secret.to_base64()));
        }

        Ok(output)
    }
}
