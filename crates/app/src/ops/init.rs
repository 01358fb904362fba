use clap::Args;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Default log level written to the config
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Encrypt stored values with a zero IV
    #[arg(long)]
    pub deterministic: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            log_level: self.log_level.clone(),
            ..AppConfig::default()
        };
        config.transport.timeout_ms = self.timeout_ms;
        config.storage.randomize_iv = !self.deterministic;

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized tether directory at: {}\n\
             - Config: {}\n\
             - Store: {}\n\
             - Log level: {}\n\
             - Timeout: {}ms\n\
             - Random IV for stored values: {}",
            state.tether_dir.display(),
            state.config_path.display(),
            state.store_path.display(),
            state.config.log_level,
            state.config.transport.timeout_ms,
            state.config.storage.randomize_iv,
        );

        Ok(output)
    }
}
