//! Sockcred Common Library
//!
//! This crate implements a small credential exchange protocol on top of a
//! connected Unix domain socket. A sender declares an application identity (a
//! numeric client id and a host name) and the kernel attaches the sender's
//! verified user and group ids as ancillary data. It includes:
//!
//! - The credential channel (activate, deactivate, send, receive)
//! - Platform-specific kernel credential layouts (Linux `ucred`, QNX `sockcred`)
//! - Length-checked parsing of socket control messages
//! - Configuration, logging and Unix socket helpers shared by the tools
//!
//! # Example
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//!
//! use sockcred_common::credentials;
//!
//! let (sender, receiver) = UnixStream::pair()?;
//! credentials::activate(&receiver);
//! credentials::send(&sender, 0x0007, "ecu-gw-01");
//!
//! if let Some(record) = credentials::receive(&receiver) {
//!     println!("client {:#06x} from {}", record.client_id(), record.host_name_lossy());
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

/// Configuration constants and environment lookups
pub mod config;

/// Error types for the credential channel
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub mod error;

/// Logging initialization for the command line tools
pub mod logging;

/// Credential record and identity sentinels
pub mod record;

/// Socket control message parsing
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub mod control;

/// Credential channel protocol
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub mod credentials;

/// Kernel credential layouts selected per target platform
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub mod platform;

/// Unix domain socket binding and connecting
#[cfg(unix)]
pub mod platform_socket;

// Re-export commonly used types for convenience
pub use config::SOCKET_NAME;
pub use record::{
    ClientId, CredentialRecord, Gid, KernelIdentity, Uid, ANY_GID, ANY_UID, MAX_HOST_NAME_LEN,
    ROUTING_CLIENT,
};
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub use credentials::{CredentialReceiver, ReceivePhase};
#[cfg(any(target_os = "linux", target_os = "android", target_os = "nto"))]
pub use error::{ChannelError, CredentialIssue};
