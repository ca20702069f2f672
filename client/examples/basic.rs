use std::time::Duration;

use anyhow::{Context, Result};
use sockcred_client::{ClientConfig, CredentialClient};
use sockcred_common::{credentials, logging, platform_socket};

fn main() -> Result<()> {
    logging::init_logging("info");

    println!("=== Credential Client Basic Example ===");

    let dir = tempfile::tempdir().context("Failed to create socket directory")?;
    let socket_path = dir.path().join("basic.sock");

    // A bare receiving socket stands in for the authority.
    let listener = platform_socket::bind_listener(&socket_path)?;
    credentials::activate(&listener);

    println!("\n1. Connect, send and disconnect step by step:");
    let config = ClientConfig::new()
        .with_socket_path(&socket_path)
        .with_timeout(Some(Duration::from_secs(5)))
        .with_client_id(0x0007)
        .with_host_name("ecu-gw-01");
    let mut client = CredentialClient::new(config)?;
    client.connect()?;
    client.send_credentials()?;
    client.disconnect()?;
    show_received(&listener)?;

    println!("\n2. One-shot announce with the system host name:");
    let config = ClientConfig::new()
        .with_socket_path(&socket_path)
        .with_client_id(0x0100);
    CredentialClient::announce(config)?;
    show_received(&listener)?;

    println!("\n✓ All examples completed successfully!");
    Ok(())
}

fn show_received(listener: &std::os::unix::net::UnixListener) -> Result<()> {
    let (stream, _) = listener.accept().context("Failed to accept")?;
    let record = credentials::try_receive(&stream)?;
    println!(
        "Received client {:#06x} from {:?} (uid {}, gid {})",
        record.client_id(),
        record.host_name_lossy(),
        record.user_id(),
        record.group_id()
    );
    Ok(())
}
