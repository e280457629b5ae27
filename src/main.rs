mod cli;
mod commands;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use mediadl::client::DaemonClient;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(args) => server::run(args.address, args.config).await?,
        command => run_client(&cli.server, command).await?,
    }

    Ok(())
}

async fn run_client(server: &str, command: Commands) -> Result<(), AnyError> {
    let client = DaemonClient::new(server)?;

    match command {
        Commands::Daemon(_) => Err("daemon is not a client command".into()),
        Commands::Add(args) => commands::add(&client, args).await,
        Commands::List => commands::list(&client).await,
        Commands::Status(args) => commands::status(&client, args).await,
        Commands::Cancel(args) => commands::cancel(&client, args).await,
        Commands::Vpn(args) => commands::vpn(&client, args).await,
        Commands::Providers => commands::providers(&client).await,
    }
}
