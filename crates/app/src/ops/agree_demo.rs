use clap::Args;
use common::crypto::{KeyAgreementError, Session, SessionError};

/// Run both sides of a key agreement in-process
#[derive(Args, Debug, Clone)]
pub struct AgreeDemo {
    /// Message the client seals and the server opens
    #[arg(long, default_value = "hello from tether")]
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AgreeDemoError {
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[from] KeyAgreementError),
    #[error("session cipher failed: {0}")]
    Session(#[from] SessionError),
}

#[async_trait::async_trait]
impl crate::op::Op for AgreeDemo {
    type Error = AgreeDemoError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = Session::generate()?;
        let mut server = Session::generate()?;

        let client_public = client.export_public_key();
        let server_public = server.export_public_key();

        client.derive_shared_secret(&server_public)?;
        server.derive_shared_secret(&client_public)?;

        let matches = client.signing_key() == server.signing_key();
        tracing::debug!(matches, "agreement complete");

        let blob = client.encrypt(self.message.as_bytes())?;
        let opened = server.decrypt(&blob)?;

        Ok(format!(
            "client public key: {}\n\
             server public key: {}\n\
             secrets match: {}\n\
             sealed: {}\n\
             opened: {}",
            client_public,
            server_public,
            matches,
            blob.to_base64(),
            String::from_utf8_lossy(&opened),
        ))
    }
}
