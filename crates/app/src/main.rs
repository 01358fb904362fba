mod args;
mod logging;
mod op;
mod ops;
mod state;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{AgreeDemo, Fetch, Handshake, Init, Open, Seal, Sign, Store, Version};

command_enum! {
    (Init, Init),
    (Version, Version),
    (Handshake, Handshake),
    (AgreeDemo, AgreeDemo),
    (Seal, Seal),
    (Open, Open),
    (Sign, Sign),
    (Fetch, Fetch),
    (Store, Store),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let ctx = match op::OpContext::new(args.config_path) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let guards = logging::init_logging(&ctx.config);

    let result = args.command.execute(&ctx).await;

    // Flush pending log lines before exiting
    drop(guards);

    match result {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
