use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Version {
    /// Print build info as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to render build info: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let build = common::build_info!();
        if self.json {
            return Ok(serde_json::to_string_pretty(&build)?);
        }
        Ok(build.to_string())
    }
}
