use clap::{Parser, Subcommand};
use mediadl::providers::Backend;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "mediadl")]
#[command(about = "VPN-gated download daemon and client", long_about = None)]
pub struct Cli {
    /// Daemon API address used by the client subcommands
    #[arg(long, global = true, default_value = "http://127.0.0.1:8420")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the download daemon
    Daemon(DaemonArgs),
    /// Submit a download
    Add(AddArgs),
    /// List all jobs
    List,
    /// Show one job, or the daemon health when no id is given
    Status(StatusArgs),
    /// Cancel a job
    Cancel(CancelArgs),
    /// Show VPN status
    Vpn(VpnArgs),
    /// Show configured backends
    Providers,
}

#[derive(clap::Args, Debug)]
pub struct DaemonArgs {
    /// Address to bind the API to; overrides `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Configuration file; overrides MEDIADL_CONFIG
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    pub url: String,

    /// http, bittorrent or usenet; inferred from the URL when omitted
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Destination directory
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Higher runs first
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    pub id: Option<Uuid>,
}

#[derive(clap::Args, Debug)]
pub struct CancelArgs {
    pub id: Uuid,
}

#[derive(clap::Args, Debug)]
pub struct VpnArgs {
    /// Recover from the kill-switch
    #[arg(long)]
    pub reconnect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cli = Cli::parse_from([
            "mediadl", "add", "magnet:?xt=urn:btih:abc", "--dest", "/data/tv", "--priority", "-2",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.url, "magnet:?xt=urn:btih:abc");
        assert_eq!(args.backend, None);
        assert_eq!(args.dest, Some(PathBuf::from("/data/tv")));
        assert_eq!(args.priority, -2);
        assert_eq!(cli.server, "http://127.0.0.1:8420");
    }

    #[test]
    fn test_parse_backend_and_server() {
        let cli = Cli::parse_from([
            "mediadl", "--server", "http://nas:8420", "add", "https://x/y.bin", "--backend", "usenet",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.backend, Some(Backend::Usenet));
        assert_eq!(cli.server, "http://nas:8420");
    }

    #[test]
    fn test_parse_daemon() {
        let cli = Cli::parse_from(["mediadl", "daemon", "--address", "0.0.0.0:9000"]);
        let Commands::Daemon(args) = cli.command else {
            panic!("expected daemon");
        };
        assert_eq!(args.address, Some("0.0.0.0:9000".parse().unwrap()));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_rejects_bad_job_id() {
        assert!(Cli::try_parse_from(["mediadl", "cancel", "not-a-uuid"]).is_err());
    }
}
