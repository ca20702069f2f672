use std::{env, path::PathBuf, time::Duration};

/// The socket the authority and senders communicate over
pub const SOCKET_NAME: &str = "sockcred.sock";

const SOCKET_DIR_ENV: &str = "SOCKCRED_SOCKET_DIR";
const DEFAULT_SOCKET_DIR: &str = "/tmp";

const IO_TIMEOUT_ENV: &str = "SOCKCRED_IO_TIMEOUT_SECS";

/// Read and write timeout used by the tools when none is configured
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Directory holding the socket, from `SOCKCRED_SOCKET_DIR` or `/tmp`
pub fn socket_dir() -> PathBuf {
    let dir = env::var(SOCKET_DIR_ENV).unwrap_or(DEFAULT_SOCKET_DIR.to_string());
    PathBuf::from(dir)
}

/// Full path of the default socket
pub fn socket_path() -> PathBuf {
    socket_dir().join(SOCKET_NAME)
}

/// Socket I/O timeout, from `SOCKCRED_IO_TIMEOUT_SECS`
///
/// A value of `0` disables the timeout. Unparseable values fall back to
/// [`DEFAULT_IO_TIMEOUT`].
pub fn io_timeout() -> Option<Duration> {
    parse_io_timeout(env::var(IO_TIMEOUT_ENV).ok().as_deref())
}

fn parse_io_timeout(value: Option<&str>) -> Option<Duration> {
    let Some(value) = value else {
        return Some(DEFAULT_IO_TIMEOUT);
    };

    match value.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            tracing::warn!(
                "Ignoring {}={:?}: {}; using {}s",
                IO_TIMEOUT_ENV,
                value,
                e,
                DEFAULT_IO_TIMEOUT.as_secs()
            );
            Some(DEFAULT_IO_TIMEOUT)
        }
    }
}

/// Parses a comma separated list of numeric ids, skipping blanks
///
/// Returns the first entry that is not a number as the error.
pub fn parse_id_list(value: &str) -> Result<Vec<u32>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().map_err(|_| s.to_string()))
        .collect()
}
