use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sockcred_client::{parse_client_id, ClientConfig, ClientId, CredentialClient};
use sockcred_common::logging;
use tracing::info;

#[derive(Parser)]
#[command(name = "sockcred-client")]
#[command(about = "Declare this process to a credential authority")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Socket to connect to (defaults to $SOCKCRED_SOCKET_DIR/sockcred.sock)
    #[arg(short, long)]
    socket_path: Option<PathBuf>,

    /// Client id to declare, decimal or 0x-prefixed hex
    #[arg(short, long, value_parser = parse_client_id)]
    client_id: ClientId,

    /// Host name to declare (defaults to the system host name)
    #[arg(long)]
    host_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let mut config = ClientConfig::new().with_client_id(args.client_id);
    if let Some(socket_path) = args.socket_path {
        config = config.with_socket_path(socket_path);
    }
    if let Some(host_name) = args.host_name {
        config = config.with_host_name(host_name);
    }

    info!(
        "Announcing client {:#06x} ({}) to {}",
        config.client_id,
        config.host_name,
        config.socket_path.display()
    );
    CredentialClient::announce(config).context("Failed to announce credentials")?;

    Ok(())
}
