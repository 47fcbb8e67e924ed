// Collection gateway - main.rs
// Parses the command line and hands off to the selected command

use clap::Parser;
use collection_gateway::cli::{dispatch, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dispatch(cli).await
}
