use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "solvebox")]
#[command(about = "SolveBox challenge solving service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Load and validate configuration, then print it
    CheckConfig(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind, overriding `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to config/solvebox.toml)
    #[arg(long, env = "SOLVEBOX_CONFIG")]
    pub config: Option<PathBuf>,
}
