//! Credential authority.
//!
//! Binds a Unix socket, asks the kernel for sender credentials, receives one
//! credential record per connection and admits or rejects the client by its
//! kernel-verified user and group id. What happens to an admitted connection
//! afterwards is up to the caller.

use std::{
    env, fs, io,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sockcred_common::{
    config, credentials, platform_socket, CredentialRecord, Gid, KernelIdentity, Uid,
};
use thiserror::Error;

pub mod peer_creds;

pub use peer_creds::PeerIdentity;

const ALLOWED_UIDS_ENV: &str = "SOCKCRED_ALLOWED_UIDS";
const ALLOWED_GIDS_ENV: &str = "SOCKCRED_ALLOWED_GIDS";
const ENFORCE_POLICY_ENV: &str = "SOCKCRED_ENFORCE_POLICY";

/// Which kernel identities the authority admits
///
/// This is server-only configuration and cannot be influenced by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityPolicy {
    /// Users admitted regardless of group
    allowed_uids: Vec<Uid>,
    /// Groups admitted regardless of user
    allowed_gids: Vec<Gid>,
    /// Whether to enforce the policy (can be disabled for development)
    enforce:      bool,
}

impl Default for AuthorityPolicy {
    /// Admits only the user the authority runs as
    fn default() -> Self {
        Self {
            allowed_uids: vec![nix::unistd::getuid().as_raw()],
            allowed_gids: Vec::new(),
            enforce:      true,
        }
    }
}

impl AuthorityPolicy {
    /// Creates an enforcing policy from explicit allow lists
    pub fn new(allowed_uids: Vec<Uid>, allowed_gids: Vec<Gid>) -> Self {
        Self {
            allowed_uids,
            allowed_gids,
            enforce: true,
        }
    }

    /// Creates a policy that admits every client
    pub fn permissive() -> Self {
        Self {
            allowed_uids: Vec::new(),
            allowed_gids: Vec::new(),
            enforce:      false,
        }
    }

    /// Creates the policy from environment variables
    ///
    /// Reads `SOCKCRED_ALLOWED_UIDS` and `SOCKCRED_ALLOWED_GIDS` (comma
    /// separated) and `SOCKCRED_ENFORCE_POLICY`. Unset variables keep the
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut policy = Self::default();

        if let Ok(uids) = env::var(ALLOWED_UIDS_ENV) {
            policy.allowed_uids = config::parse_id_list(&uids)
                .map_err(|bad| anyhow!("Invalid uid {:?} in {}", bad, ALLOWED_UIDS_ENV))?;
        }

        if let Ok(gids) = env::var(ALLOWED_GIDS_ENV) {
            policy.allowed_gids = config::parse_id_list(&gids)
                .map_err(|bad| anyhow!("Invalid gid {:?} in {}", bad, ALLOWED_GIDS_ENV))?;
        }

        if let Ok(enforce) = env::var(ENFORCE_POLICY_ENV) {
            policy.enforce = !enforce.trim().eq_ignore_ascii_case("false");
        }

        Ok(policy)
    }

    /// Get all allowed user ids
    pub fn allowed_uids(&self) -> &[Uid] {
        &self.allowed_uids
    }

    /// Get all allowed group ids
    pub fn allowed_gids(&self) -> &[Gid] {
        &self.allowed_gids
    }

    /// Check if the policy is enforced
    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    /// Decides whether a kernel identity is admitted
    ///
    /// Unknown identities are never admitted by an enforcing policy.
    pub fn evaluate(&self, identity: KernelIdentity) -> Verdict {
        if !self.enforce {
            return Verdict::Accepted;
        }

        if !identity.is_known() {
            return Verdict::Rejected(RejectReason::Unverified);
        }

        let uid = identity.user_id();
        let gid = identity.group_id();
        if self.allowed_uids.contains(&uid) || self.allowed_gids.contains(&gid) {
            Verdict::Accepted
        } else {
            Verdict::Rejected(RejectReason::NotAllowed { uid, gid })
        }
    }
}

/// Why a client was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("no verified kernel credentials")]
    Unverified,

    #[error("uid {uid} / gid {gid} is not allowed")]
    NotAllowed { uid: Uid, gid: Gid },
}

/// Outcome of applying the policy to a received record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// One handled connection
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub record:  CredentialRecord,
    /// Connect-time identity, when the platform reports it
    pub peer:    Option<PeerIdentity>,
    pub verdict: Verdict,
}

/// An authority that admits clients by their kernel-verified identity
#[derive(Debug, Clone)]
pub struct CredentialAuthority {
    socket_path: PathBuf,
    policy:      AuthorityPolicy,
    io_timeout:  Option<Duration>,
}

impl CredentialAuthority {
    /// Creates an authority for `socket_path`.
    ///
    /// # Arguments
    /// * `socket_path` - Where to bind the listening socket
    /// * `policy` - Which kernel identities to admit
    pub fn new(socket_path: impl Into<PathBuf>, policy: AuthorityPolicy) -> Self {
        Self {
            socket_path: socket_path.into(),
            policy,
            io_timeout: Some(config::DEFAULT_IO_TIMEOUT),
        }
    }

    /// Set the per-connection read and write timeout
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Returns the socket path this authority binds to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the admission policy.
    pub fn policy(&self) -> &AuthorityPolicy {
        &self.policy
    }

    /// Binds the listening socket with credential reception enabled.
    ///
    /// Accepted connections inherit credential reception from the listener,
    /// so credentials sent before the connection is accepted are kept.
    pub fn bind(&self) -> Result<UnixListener> {
        let listener = platform_socket::bind_listener(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", self.socket_path.display()))?;
        credentials::activate(&listener);

        tracing::info!(
            "Credential authority listening on: {}",
            self.socket_path.display()
        );
        if !self.policy.is_enforced() {
            tracing::warn!(
                "⚠️  Admission policy is disabled ({}=false)",
                ENFORCE_POLICY_ENV
            );
        }
        Ok(listener)
    }

    /// Accepts and handles exactly one connection.
    pub fn accept_one(&self, listener: &UnixListener) -> Result<Admission> {
        let (stream, _) = listener.accept().context("Failed to accept connection")?;
        tracing::info!("New connection received");
        self.handle_client(stream)
    }

    /// Handles connections until `running` is cleared.
    ///
    /// The listener is switched to non-blocking mode so the flag is checked
    /// between accepts. Each admission, accepted or rejected, is passed to
    /// `on_admission`. Errors of a single connection are logged and do not
    /// stop the loop.
    pub fn run_with_shutdown<F>(
        &self,
        listener: &UnixListener,
        running: Arc<AtomicBool>,
        mut on_admission: F,
    ) -> Result<()>
    where
        F: FnMut(&Admission),
    {
        listener
            .set_nonblocking(true)
            .context("Failed to set listener to non-blocking mode")?;

        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    tracing::info!("New connection received");
                    match self.handle_client(stream) {
                        Ok(admission) => on_admission(&admission),
                        Err(e) => tracing::error!("Client error: {:#}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                }
            }
        }

        tracing::info!("Shutdown signal received, stopping gracefully");
        Ok(())
    }

    /// Receives the client's credentials and applies the policy.
    pub fn handle_client(&self, stream: UnixStream) -> Result<Admission> {
        platform_socket::configure_stream(&stream, self.io_timeout)?;
        credentials::activate(&stream);

        let peer = match peer_creds::peer_identity(&stream) {
            Ok(peer) => {
                tracing::debug!(
                    "Peer at connect: PID {}, UID {}, GID {}",
                    peer.pid,
                    peer.uid,
                    peer.gid
                );
                Some(peer)
            }
            Err(e) => {
                tracing::debug!("{:#}", e);
                None
            }
        };

        let record = credentials::receive(&stream)
            .ok_or_else(|| anyhow!("No credentials received from client"))?;

        tracing::info!(
            "Client {:#06x} on host {:?}: UID {}, GID {}",
            record.client_id(),
            record.host_name_lossy(),
            record.user_id(),
            record.group_id()
        );

        if let Some(peer) = &peer {
            if record.has_kernel_identity()
                && (peer.uid, peer.gid) != (record.user_id(), record.group_id())
            {
                tracing::warn!(
                    "Sender identity {}:{} differs from connecting identity {}:{}",
                    record.user_id(),
                    record.group_id(),
                    peer.uid,
                    peer.gid
                );
            }
        }

        let verdict = self.policy.evaluate(record.kernel_identity());
        match verdict {
            Verdict::Accepted => tracing::info!("✓ Client {:#06x} admitted", record.client_id()),
            Verdict::Rejected(reason) => {
                tracing::warn!("✗ Client {:#06x} rejected: {}", record.client_id(), reason)
            }
        }

        Ok(Admission {
            record,
            peer,
            verdict,
        })
    }

    /// Removes the socket file.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down credential authority...");
        match fs::remove_file(&self.socket_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove socket file {}", self.socket_path.display())
            }),
        }
    }
}
