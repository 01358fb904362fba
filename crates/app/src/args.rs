pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Key agreement, request signing and certificate-pinned fetches")]
pub struct Args {
    /// Path to the tether state directory (defaults to ~/.tether)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
