use std::os::unix::net::UnixStream;

use anyhow::Result;
use serde::Serialize;

/// Identity of the process that connected, as recorded by the kernel at
/// `connect(2)` time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerIdentity {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Get the connect-time credentials of the peer of a Unix stream
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn peer_identity(stream: &UnixStream) -> Result<PeerIdentity> {
    use anyhow::Context;
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    let creds = getsockopt(stream, PeerCredentials).context("Failed to get peer credentials")?;

    Ok(PeerIdentity {
        pid: creds.pid(),
        uid: creds.uid(),
        gid: creds.gid(),
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn peer_identity(_stream: &UnixStream) -> Result<PeerIdentity> {
    Err(anyhow::anyhow!(
        "Peer credential lookup not supported on this platform"
    ))
}
