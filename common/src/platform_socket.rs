use std::{
    fs,
    io,
    os::unix::{
        fs::{FileTypeExt, PermissionsExt},
        net::{UnixListener, UnixStream},
    },
    path::Path,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};

/// Binds a listener at `socket_path`, replacing a stale socket file.
///
/// The socket file is restricted to its owner (mode 600).
pub fn bind_listener(socket_path: &Path) -> Result<UnixListener> {
    tracing::info!("Setting up Unix socket listener: {}", socket_path.display());

    match fs::symlink_metadata(socket_path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            tracing::warn!("Existing socket file found, removing it...");
            fs::remove_file(socket_path).with_context(|| {
                format!(
                    "Could not remove existing socket file '{}'. You may need to stop the \
                     existing authority or remove the file manually.",
                    socket_path.display()
                )
            })?;
        }
        Ok(_) => {
            return Err(anyhow!(
                "Path '{}' exists and is not a socket; refusing to replace it",
                socket_path.display()
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("No existing socket file found");
        }
        Err(e) => {
            return Err(anyhow!(
                "Cannot inspect socket path '{}': {}",
                socket_path.display(),
                e
            ));
        }
    }

    if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let metadata = fs::metadata(parent).with_context(|| {
            format!("Cannot access parent directory '{}'", parent.display())
        })?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "Parent path '{}' exists but is not a directory",
                parent.display()
            ));
        }
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| {
        tracing::error!("Failed to bind to socket: {} (kind: {:?})", e, e.kind());
        let detail = match e.kind() {
            io::ErrorKind::PermissionDenied => format!(
                "Permission denied creating socket '{}'. Check the parent directory permissions.",
                socket_path.display()
            ),
            io::ErrorKind::AddrInUse => format!(
                "Socket '{}' is already in use. Another authority may be running.",
                socket_path.display()
            ),
            io::ErrorKind::InvalidInput => format!(
                "Invalid socket path '{}'. Check that the path is valid and not too long.",
                socket_path.display()
            ),
            _ => format!(
                "Unexpected error binding to socket '{}': {}",
                socket_path.display(),
                e
            ),
        };
        anyhow!("{} (OS error code: {})", detail, e.raw_os_error().unwrap_or(-1))
    })?;

    if let Err(e) = fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set socket permissions: {}", e);
    } else {
        tracing::debug!("Socket permissions set to 600 (owner read/write only)");
    }

    tracing::info!("Unix socket listener setup complete");
    Ok(listener)
}

/// Connects to the listener at `socket_path` in blocking mode.
pub fn connect_socket(socket_path: &Path, timeout: Option<Duration>) -> Result<UnixStream> {
    tracing::debug!("Attempting to connect to Unix socket: {}", socket_path.display());

    let stream = UnixStream::connect(socket_path).map_err(|e| {
        tracing::error!("Connection failed: {} (kind: {:?})", e, e.kind());
        let detail = match e.kind() {
            io::ErrorKind::NotFound => format!(
                "Socket file not found at '{}'. The authority may have stopped or never started.",
                socket_path.display()
            ),
            io::ErrorKind::PermissionDenied => format!(
                "Permission denied accessing socket '{}'. Check socket ownership and mode.",
                socket_path.display()
            ),
            io::ErrorKind::ConnectionRefused => format!(
                "Connection refused to socket '{}'. The authority may be starting up or shutting \
                 down.",
                socket_path.display()
            ),
            _ => format!(
                "Unexpected error connecting to socket '{}': {}",
                socket_path.display(),
                e
            ),
        };
        anyhow!("{} (OS error code: {})", detail, e.raw_os_error().unwrap_or(-1))
    })?;

    configure_stream(&stream, timeout)?;
    tracing::info!("Connected to {}", socket_path.display());
    Ok(stream)
}

/// Puts `stream` in blocking mode with the given read and write timeouts.
pub fn configure_stream(stream: &UnixStream, timeout: Option<Duration>) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("Failed to set socket to blocking mode")?;
    stream
        .set_read_timeout(timeout)
        .context("Failed to set read timeout")?;
    stream
        .set_write_timeout(timeout)
        .context("Failed to set write timeout")?;
    tracing::debug!("Socket configured for blocking I/O with timeout {:?}", timeout);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_socket_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sockcred-{}-{}.sock", name, std::process::id()))
    }

    #[test]
    fn bind_replaces_stale_socket() {
        let path = temp_socket_path("stale");
        let first = bind_listener(&path).unwrap();
        drop(first);
        assert!(path.exists());

        let _second = bind_listener(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn bind_refuses_to_replace_regular_file() {
        let path = temp_socket_path("regular");
        fs::write(&path, b"not a socket").unwrap();
        assert!(bind_listener(&path).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let path = temp_socket_path("missing");
        let err = connect_socket(&path, None).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn connect_applies_timeouts() {
        let path = temp_socket_path("timeouts");
        let _listener = bind_listener(&path).unwrap();
        let timeout = Some(Duration::from_secs(3));
        let stream = connect_socket(&path, timeout).unwrap();
        assert_eq!(stream.read_timeout().unwrap(), timeout);
        assert_eq!(stream.write_timeout().unwrap(), timeout);
        fs::remove_file(&path).unwrap();
    }
}
