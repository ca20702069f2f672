use std::{os::unix::net::UnixStream, thread};

use anyhow::{Context, Result};
use sockcred_common::{credentials, logging};
use sockcred_server::{AuthorityPolicy, CredentialAuthority};

/// Basic example of admitting a client by its kernel credentials
fn main() -> Result<()> {
    logging::init_logging("info");

    println!("=== Credential Authority Basic Example ===");

    let dir = tempfile::tempdir().context("Failed to create socket directory")?;
    let authority = CredentialAuthority::new(
        dir.path().join("basic.sock"),
        AuthorityPolicy::default(),
    );

    println!("\n1. Binding authority:");
    let listener = authority.bind()?;
    println!("✓ Listening on {}", authority.socket_path().display());
    println!("Allowed uids: {:?}", authority.policy().allowed_uids());

    println!("\n2. Declaring a client from another thread:");
    let socket_path = authority.socket_path().to_path_buf();
    let sender = thread::spawn(move || -> Result<()> {
        let stream = UnixStream::connect(&socket_path).context("Failed to connect")?;
        credentials::try_send(&stream, 0x0007, "ecu-gw-01")?;
        Ok(())
    });

    let admission = authority.accept_one(&listener)?;
    sender
        .join()
        .map_err(|_| anyhow::anyhow!("Sender thread panicked"))??;

    println!("Client id:  {:#06x}", admission.record.client_id());
    println!("Host name:  {}", admission.record.host_name_lossy());
    println!(
        "Identity:   uid {} gid {}",
        admission.record.user_id(),
        admission.record.group_id()
    );
    println!("Verdict:    {:?}", admission.verdict);

    println!("\n3. Admission as JSON:");
    println!("{}", serde_json::to_string_pretty(&admission)?);

    authority.shutdown()?;
    println!("\n✓ Example completed");
    Ok(())
}
