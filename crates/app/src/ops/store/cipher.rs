use clap::Args;
use common::crypto::IvPolicy;

use super::{KeyArgs, StoreOpError};
use crate::op::OpContext;

/// Encrypt a string with the at-rest cipher
#[derive(Args, Debug, Clone)]
pub struct Encrypt {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Use a zero IV so equal inputs give equal output
    #[arg(long)]
    pub deterministic: bool,

    pub plaintext: String,
}

/// Decrypt an at-rest blob
#[derive(Args, Debug, Clone)]
pub struct Decrypt {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Base64 `iv || ciphertext`
    pub blob: String,
}

#[async_trait::async_trait]
impl crate::op::Op for Encrypt {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let policy = if self.deterministic {
            IvPolicy::Zero
        } else {
            ctx.config.storage.iv_policy()
        };
        Ok(self.key.cipher(ctx)?.encrypt(&self.plaintext, policy)?)
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Decrypt {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        Ok(self.key.cipher(ctx)?.decrypt(&self.blob)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::op::Op;
    use crate::state::AppConfig;

    fn ctx() -> OpContext {
        OpContext {
            config_path: None,
            config: AppConfig::default(),
        }
    }

    fn key() -> KeyArgs {
        KeyArgs {
            key: Some("0123456789abcdef".to_string()),
        }
    }

    #[tokio::test]
    async fn test_deterministic_encrypt_matches_known_output() {
        let blob = Encrypt {
            key: key(),
            deterministic: true,
            plaintext: "hello world".to_string(),
        }
        .execute(&ctx())
        .await
        .unwrap();
        assert_eq!(blob, "AAAAAAAAAAAAAAAAAAAAAIFpvtTvSaiHRVnFsgDarec");

        let plaintext = Decrypt { key: key(), blob }
            .execute(&ctx())
            .await
            .unwrap();
        assert_eq!(plaintext, "hello world");
    }

    #[tokio::test]
    async fn test_random_iv_by_default() {
        let encrypt = Encrypt {
            key: key(),
            deterministic: false,
            plaintext: "same".to_string(),
        };
        let a = encrypt.execute(&ctx()).await.unwrap();
        let b = encrypt.execute(&ctx()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_bad_key_length() {
        let err = Encrypt {
            key: KeyArgs {
                key: Some("short".to_string()),
            },
            deterministic: true,
            plaintext: "x".to_string(),
        }
        .execute(&ctx())
        .await
        .unwrap_err();
        assert!(matches!(err, StoreOpError::Cipher(_)));
    }
}
