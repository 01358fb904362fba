use clap::{Args, Subcommand};

pub mod cipher;
pub mod items;

use common::crypto::{AtRestCipher, StorageCipherError};
use common::storage::{device_key, DeviceKeyError, SecureStore, StoreError};

use crate::op::{Op, OpContext};
use crate::state::{AppState, StateError};

crate::command_enum! {
    (Set, items::Set),
    (Get, items::Get),
    (Merge, items::Merge),
    (Rm, items::Rm),
    (Keys, items::Keys),
    (Clear, items::Clear),
    (Encrypt, cipher::Encrypt),
    (Decrypt, cipher::Decrypt),
}

// Rename the generated Command to StoreCommand for clarity
pub type StoreCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Store {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[async_trait::async_trait]
impl Op for Store {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// At-rest key selection shared by every store subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct KeyArgs {
    /// At-rest key (16, 24 or 32 bytes); overrides the configured and device key
    #[arg(long)]
    pub key: Option<String>,
}

impl KeyArgs {
    /// Flag, then config, then the device key
    pub fn resolve(&self, ctx: &OpContext) -> Result<String, StoreOpError> {
        if let Some(key) = self.key.as_ref().or(ctx.config.storage.key.as_ref()) {
            return Ok(key.clone());
        }
        Ok(device_key()?)
    }

    pub fn cipher(&self, ctx: &OpContext) -> Result<AtRestCipher, StoreOpError> {
        Ok(AtRestCipher::new(&self.resolve(ctx)?)?)
    }

    pub fn open_store(&self, ctx: &OpContext) -> Result<SecureStore, StoreOpError> {
        let path = AppState::store_path(ctx.config_path.clone())?;
        Ok(SecureStore::open(
            path,
            &self.resolve(ctx)?,
            ctx.config.storage.iv_policy(),
        )?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreOpError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("no at-rest key: {0}")]
    DeviceKey(#[from] DeviceKeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cipher(#[from] StorageCipherError),
    #[error("no value stored for '{0}'")]
    NotFound(String),
    #[error("expected key=value, got '{0}'")]
    InvalidPair(String),
    #[error("failed to render values: {0}")]
    Json(#[from] serde_json::Error),
}
