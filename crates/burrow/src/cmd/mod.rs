use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod client;
pub mod server;
pub mod services;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent: register services with the relay and bridge connections.
    Client(ClientArgs),
    /// Run the relay: accept agents and open their public ports.
    Server(ServerArgs),
    /// Print the service mappings from a client config without connecting.
    Services(ServicesArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Client(args) => client::run(args),
        Command::Server(args) => server::run(args),
        Command::Services(args) => services::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Client config file (JSON).
    #[arg(
        long,
        short = 'c',
        env = "BURROW_CONFIG",
        default_value = "./config/client.json"
    )]
    pub config: PathBuf,
    /// Override the relay address from the config file.
    #[arg(long, env = "BURROW_SERVER", value_name = "ADDR")]
    pub server: Option<String>,
    /// Treat a partial service registration as a failed login.
    #[arg(long)]
    pub require_all_services: bool,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Control listener address.
    #[arg(long, env = "BURROW_LISTEN", default_value = burrow_session::DEFAULT_CONTROL_ADDR)]
    pub listen: String,
    /// Host that public service listeners bind to.
    #[arg(long, env = "BURROW_PUBLIC_HOST", default_value = "0.0.0.0")]
    pub public_host: String,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Client config file (JSON).
    #[arg(
        long,
        short = 'c',
        env = "BURROW_CONFIG",
        default_value = "./config/client.json"
    )]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
