use std::{os::unix::net::UnixStream, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use sockcred_common::{
    config, credentials, platform_socket::connect_socket, ClientId, MAX_HOST_NAME_LEN,
    ROUTING_CLIENT,
};

/// Configuration for the credential sender
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket path to connect to
    pub socket_path: PathBuf,
    /// Read and write timeout, `None` to block indefinitely
    pub timeout:     Option<Duration>,
    /// Client id to declare
    pub client_id:   ClientId,
    /// Host name to declare
    pub host_name:   String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: config::socket_path(),
            timeout:     config::io_timeout(),
            client_id:   ROUTING_CLIENT,
            host_name:   default_host_name(),
        }
    }
}

impl ClientConfig {
    /// Creates a client configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket path
    pub fn with_socket_path<P: Into<PathBuf>>(mut self, socket_path: P) -> Self {
        self.socket_path = socket_path.into();
        self
    }

    /// Set the operation timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the declared client id
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the declared host name
    pub fn with_host_name<S: Into<String>>(mut self, host_name: S) -> Self {
        self.host_name = host_name.into();
        self
    }
}

/// The system host name, or `localhost` if it cannot be determined
pub fn default_host_name() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!("Failed to get host name: {}; using localhost", e);
            "localhost".to_string()
        }
    }
}

/// Parses a client id given in decimal or as `0x`-prefixed hex
pub fn parse_client_id(value: &str) -> Result<ClientId, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => ClientId::from_str_radix(hex, 16),
        None => value.parse::<ClientId>(),
    };
    parsed.map_err(|e| format!("invalid client id {value:?}: {e}"))
}

/// Sends this process's credentials to a credential authority
pub struct CredentialClient {
    config:     ClientConfig,
    connection: Option<UnixStream>,
}

impl CredentialClient {
    /// Creates a client with the given configuration
    ///
    /// Host names longer than the wire format allows are rejected here rather
    /// than truncated on send.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.host_name.len() > MAX_HOST_NAME_LEN {
            return Err(anyhow!(
                "Host name is {} bytes long; at most {} bytes can be sent",
                config.host_name.len(),
                MAX_HOST_NAME_LEN
            ));
        }

        Ok(Self {
            config,
            connection: None,
        })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the credential authority
    pub fn connect(&mut self) -> Result<()> {
        tracing::debug!(
            "Connecting to credential authority: {}",
            self.config.socket_path.display()
        );

        let stream = connect_socket(&self.config.socket_path, self.config.timeout)
            .context("Failed to connect to authority socket")?;
        self.connection = Some(stream);
        Ok(())
    }

    /// Send the configured client id and host name
    pub fn send_credentials(&mut self) -> Result<()> {
        let stream = self
            .connection
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected to the credential authority"))?;

        credentials::try_send(stream, self.config.client_id, &self.config.host_name)
            .context("Failed to send credentials")?;

        tracing::info!(
            "✓ Sent credentials for client {:#06x} ({})",
            self.config.client_id,
            self.config.host_name
        );
        Ok(())
    }

    /// Disconnect from the authority
    pub fn disconnect(&mut self) -> Result<()> {
        if self.connection.take().is_some() {
            tracing::debug!("Disconnected from credential authority");
        }
        Ok(())
    }

    /// Check if client is connected to the authority
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The open connection, if any
    pub fn stream(&self) -> Option<&UnixStream> {
        self.connection.as_ref()
    }

    /// Connect, send and disconnect in one call
    pub fn announce(config: ClientConfig) -> Result<()> {
        let mut client = Self::new(config)?;
        client.connect()?;
        let result = client.send_credentials();
        client.disconnect()?;
        result
    }
}

impl Drop for CredentialClient {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_client_ids() {
        assert_eq!(parse_client_id("7"), Ok(7));
        assert_eq!(parse_client_id("0x0007"), Ok(7));
        assert_eq!(parse_client_id("0XFFFF"), Ok(0xFFFF));
        assert!(parse_client_id("0x10000").is_err());
        assert!(parse_client_id("gateway").is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ClientConfig::new()
            .with_socket_path("/tmp/other.sock")
            .with_timeout(None)
            .with_client_id(0x0042)
            .with_host_name("ecu-gw-01");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.timeout, None);
        assert_eq!(config.client_id, 0x0042);
        assert_eq!(config.host_name, "ecu-gw-01");
    }

    #[test]
    fn default_client_is_routing_client() {
        assert_eq!(ClientConfig::default().client_id, ROUTING_CLIENT);
        assert!(!default_host_name().is_empty());
    }

    #[test]
    fn overlong_host_name_is_rejected() {
        let config = ClientConfig::new().with_host_name("h".repeat(MAX_HOST_NAME_LEN + 1));
        assert!(CredentialClient::new(config).is_err());
    }

    #[test]
    fn sending_requires_connection() {
        let mut client = CredentialClient::new(ClientConfig::new().with_host_name("a")).unwrap();
        assert!(!client.is_connected());
        assert!(client.send_credentials().is_err());
    }
}
