//! Refyna command-line entry point

use anyhow::Context;
use clap::Parser;
use refyna_lib::commands::{self, Cli};
use refyna_lib::AppController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let controller = AppController::new().context("failed to initialize refyna")?;
    commands::run(&controller, cli.command).await?;
    Ok(())
}
