//! Sockcred Client Library
//!
//! Connects to a credential authority over a Unix domain socket and declares
//! a client id and host name. The kernel attaches this process's user and
//! group id, which the authority uses to admit or reject the client.
//!
//! # Example
//!
//! ```no_run
//! use sockcred_client::{ClientConfig, CredentialClient};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ClientConfig::new()
//!     .with_client_id(0x0007)
//!     .with_host_name("ecu-gw-01");
//!
//! let mut client = CredentialClient::new(config)?;
//! client.connect()?;
//! client.send_credentials()?;
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from sockcred-common for convenience
pub use sockcred_common::{ClientId, SOCKET_NAME};
