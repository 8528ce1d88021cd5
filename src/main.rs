mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use solvebox::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    solvebox::observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let config = Config::load_with_override(args.config.config)?;
            solvebox::api::run(config, args.address).await?
        }
        Commands::CheckConfig(args) => {
            let config = Config::load_with_override(args.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
