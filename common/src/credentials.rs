//! The credential channel.
//!
//! A sender writes two messages on a connected Unix domain socket:
//!
//! | Message | Field            | Size                     |
//! |---------|------------------|--------------------------|
//! | header  | client id        | `size_of::<ClientId>()`  |
//! | header  | host name length | 1 byte                   |
//! | body    | host name        | host name length bytes   |
//!
//! All integers are in native byte order. The sender attaches no ancillary
//! data; the kernel adds the sender's credentials to the header when the
//! receiving socket asked for them with [`activate`]. The receiver reads the
//! header together with that control data, then the body. The two reads must
//! match the two writes: there is no framing that would let a receiver
//! resynchronize with a peer that sends anything else.
//!
//! Failures are logged. The `try_` variants return them instead.

use std::{
    fmt, io, mem,
    os::fd::{AsFd, AsRawFd, BorrowedFd},
    ptr,
};

use crate::{
    control::{extract_credential, ControlBuffer},
    error::ChannelError,
    platform::{KernelCredential, PlatformCredential},
    record::{ClientId, CredentialRecord, KernelIdentity, MAX_HOST_NAME_LEN},
};

const CLIENT_ID_LEN: usize = mem::size_of::<ClientId>();

/// Size of the header message: client id plus the one-byte length prefix.
pub const HEADER_LEN: usize = CLIENT_ID_LEN + 1;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Asks the kernel to attach sender credentials to messages received on `fd`.
///
/// On kernels that always attach credentials this does nothing. A failure is
/// logged and the socket is left as it was; credentials may then be missing
/// from later receives.
pub fn activate<F: AsFd>(fd: &F) {
    if let Err(e) = try_activate(fd) {
        tracing::error!("Security: {}", e);
    }
}

/// Stops the kernel from attaching sender credentials to messages on `fd`.
///
/// Same failure policy as [`activate`].
pub fn deactivate<F: AsFd>(fd: &F) {
    if let Err(e) = try_deactivate(fd) {
        tracing::error!("Security: {}", e);
    }
}

/// [`activate`], returning the failure instead of logging it.
pub fn try_activate<F: AsFd>(fd: &F) -> Result<(), ChannelError> {
    set_passcred(fd.as_fd(), true).map_err(ChannelError::Activate)
}

/// [`deactivate`], returning the failure instead of logging it.
pub fn try_deactivate<F: AsFd>(fd: &F) -> Result<(), ChannelError> {
    set_passcred(fd.as_fd(), false).map_err(ChannelError::Deactivate)
}

/// Whether messages received on `fd` will carry sender credentials.
pub fn is_active<F: AsFd>(fd: &F) -> Result<bool, ChannelError> {
    get_passcred(fd.as_fd()).map_err(ChannelError::Query)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_passcred(fd: BorrowedFd<'_>, enabled: bool) -> io::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt::PassCred};

    setsockopt(&fd, PassCred, &enabled).map_err(io::Error::from)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn get_passcred(fd: BorrowedFd<'_>) -> io::Result<bool> {
    use nix::sys::socket::{getsockopt, sockopt::PassCred};

    getsockopt(&fd, PassCred).map_err(io::Error::from)
}

#[cfg(target_os = "nto")]
fn set_passcred(_fd: BorrowedFd<'_>, _enabled: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "nto")]
fn get_passcred(_fd: BorrowedFd<'_>) -> io::Result<bool> {
    Ok(!PlatformCredential::ACTIVATION_REQUIRED)
}

/// Sends `client` and `host_name` to the peer of `fd`.
///
/// Host names longer than [`MAX_HOST_NAME_LEN`] bytes are cut to their first
/// [`MAX_HOST_NAME_LEN`] bytes. A failure is logged and not retried.
pub fn send<F: AsFd, H: AsRef<[u8]>>(fd: &F, client: ClientId, host_name: H) {
    if let Err(e) = try_send(fd, client, host_name) {
        tracing::error!("Security: {}", e);
    }
}

/// [`send`], returning the failure instead of logging it.
pub fn try_send<F: AsFd, H: AsRef<[u8]>>(
    fd: &F,
    client: ClientId,
    host_name: H,
) -> Result<(), ChannelError> {
    let fd = fd.as_fd();
    let host_name = truncate_host_name(host_name.as_ref());

    let mut header = [0u8; HEADER_LEN];
    header[..CLIENT_ID_LEN].copy_from_slice(&client.to_ne_bytes());
    header[CLIENT_ID_LEN] = host_name.len() as u8;

    send_all(fd, &header).map_err(ChannelError::Send)?;
    if !host_name.is_empty() {
        send_all(fd, host_name).map_err(ChannelError::Send)?;
    }
    Ok(())
}

fn truncate_host_name(host_name: &[u8]) -> &[u8] {
    if host_name.len() > MAX_HOST_NAME_LEN {
        tracing::warn!(
            "Security: host name of {} bytes truncated to {} bytes",
            host_name.len(),
            MAX_HOST_NAME_LEN
        );
        &host_name[..MAX_HOST_NAME_LEN]
    } else {
        host_name
    }
}

/// Receives one credential record from the peer of `fd`.
///
/// Returns `None` if either read fails. A missing or invalid kernel credential
/// does not fail the receive; the record then carries
/// [`KernelIdentity::UNKNOWN`].
pub fn receive<F: AsFd>(fd: &F) -> Option<CredentialRecord> {
    match try_receive(fd) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::error!("Security: {}", e);
            None
        }
    }
}

/// [`receive`], returning the failure instead of logging it.
pub fn try_receive<F: AsFd>(fd: &F) -> Result<CredentialRecord, ChannelError> {
    CredentialReceiver::new(fd.as_fd()).run()
}

/// Where a [`CredentialReceiver`] stands in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePhase {
    AwaitingHeader,
    AwaitingBody,
    Complete,
}

impl fmt::Display for ReceivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceivePhase::AwaitingHeader => f.write_str("awaiting header"),
            ReceivePhase::AwaitingBody => f.write_str("awaiting body"),
            ReceivePhase::Complete => f.write_str("complete"),
        }
    }
}

enum State {
    AwaitingHeader,
    AwaitingBody {
        client_id:     ClientId,
        identity:      KernelIdentity,
        host_name_len: usize,
    },
    Complete(CredentialRecord),
}

/// Receive side of the exchange, one read per [`advance`](Self::advance).
///
/// ```text
/// AwaitingHeader --header read--> AwaitingBody --body read--> Complete
/// ```
///
/// A failed read leaves the receiver in the phase it failed in. The
/// connection should be dropped at that point: a partial message cannot be
/// skipped.
pub struct CredentialReceiver<'fd> {
    fd:    BorrowedFd<'fd>,
    state: State,
}

impl<'fd> CredentialReceiver<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self {
            fd,
            state: State::AwaitingHeader,
        }
    }

    pub fn phase(&self) -> ReceivePhase {
        match self.state {
            State::AwaitingHeader => ReceivePhase::AwaitingHeader,
            State::AwaitingBody { .. } => ReceivePhase::AwaitingBody,
            State::Complete(_) => ReceivePhase::Complete,
        }
    }

    /// Performs the read for the current phase and returns the new phase.
    ///
    /// An empty host name completes the exchange without a body read.
    pub fn advance(&mut self) -> Result<ReceivePhase, ChannelError> {
        let next = match &self.state {
            State::AwaitingHeader => {
                let (client_id, host_name_len, identity) = self.read_header()?;
                if host_name_len == 0 {
                    State::Complete(CredentialRecord::new(client_id, identity, Vec::new()))
                } else {
                    State::AwaitingBody {
                        client_id,
                        identity,
                        host_name_len,
                    }
                }
            }
            State::AwaitingBody {
                client_id,
                identity,
                host_name_len,
            } => {
                let mut host_name = vec![0u8; *host_name_len];
                recv_exact(self.fd, &mut host_name, 0, ReceivePhase::AwaitingBody)?;
                State::Complete(CredentialRecord::new(*client_id, *identity, host_name))
            }
            State::Complete(_) => return Ok(ReceivePhase::Complete),
        };
        self.state = next;
        Ok(self.phase())
    }

    /// Advances until complete and returns the record.
    pub fn run(mut self) -> Result<CredentialRecord, ChannelError> {
        loop {
            if let State::Complete(record) = self.state {
                return Ok(record);
            }
            self.advance()?;
        }
    }

    /// The finished record, if the exchange is complete.
    pub fn into_record(self) -> Option<CredentialRecord> {
        match self.state {
            State::Complete(record) => Some(record),
            _ => None,
        }
    }

    fn read_header(&self) -> Result<(ClientId, usize, KernelIdentity), ChannelError> {
        let phase = ReceivePhase::AwaitingHeader;
        let mut header = [0u8; HEADER_LEN];
        let mut control = ControlBuffer::new();

        let received = recv_msg(self.fd, &mut header, Some(&mut control))
            .map_err(|source| ChannelError::Receive { phase, source })?;
        if received.bytes == 0 {
            return Err(ChannelError::UnexpectedEof {
                phase,
                expected: HEADER_LEN,
                received: 0,
            });
        }
        if received.bytes < HEADER_LEN {
            recv_exact(self.fd, &mut header, received.bytes, phase)?;
        }

        let control_data = control.filled(received.control_len);
        let identity =
            match extract_credential::<PlatformCredential>(control_data, received.control_truncated)
            {
                Ok(credential) => {
                    tracing::debug!(
                        "Received kernel credentials: uid={}, gid={}",
                        credential.user_id(),
                        credential.group_id()
                    );
                    KernelIdentity::new(credential.user_id(), credential.group_id())
                }
                Err(issue) => {
                    tracing::error!(
                        "Security: receiving credentials failed. Invalid data: {}",
                        issue
                    );
                    KernelIdentity::UNKNOWN
                }
            };

        let [id_lo, id_hi, host_name_len] = header;
        let client_id = ClientId::from_ne_bytes([id_lo, id_hi]);
        Ok((client_id, usize::from(host_name_len), identity))
    }
}

struct Received {
    bytes:             usize,
    control_len:       usize,
    control_truncated: bool,
}

/// One `recvmsg` into `buf`, optionally requesting control data.
fn recv_msg(
    fd: BorrowedFd<'_>,
    buf: &mut [u8],
    mut control: Option<&mut ControlBuffer>,
) -> io::Result<Received> {
    loop {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len:  buf.len(),
        };
        // SAFETY: an all-zero msghdr is a valid empty message description.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = ptr::null_mut();
        msg.msg_namelen = 0;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1 as _;
        if let Some(control) = control.as_deref_mut() {
            msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
            msg.msg_controllen = control.capacity() as _;
        }

        // SAFETY: `msg` points at `iov`, which describes `buf`, and at the
        // control buffer with its real capacity. All of them outlive the call.
        let n = unsafe { libc::recvmsg(fd.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        let (control_len, control_truncated) = if control.is_some() {
            (
                msg.msg_controllen as usize,
                msg.msg_flags & libc::MSG_CTRUNC != 0,
            )
        } else {
            (0, false)
        };
        return Ok(Received {
            bytes: n as usize,
            control_len,
            control_truncated,
        });
    }
}

/// Fills `buf[filled..]` with plain reads, failing on end of stream.
fn recv_exact(
    fd: BorrowedFd<'_>,
    buf: &mut [u8],
    mut filled: usize,
    phase: ReceivePhase,
) -> Result<(), ChannelError> {
    while filled < buf.len() {
        let received = recv_msg(fd, &mut buf[filled..], None)
            .map_err(|source| ChannelError::Receive { phase, source })?;
        if received.bytes == 0 {
            return Err(ChannelError::UnexpectedEof {
                phase,
                expected: buf.len(),
                received: filled,
            });
        }
        filled += received.bytes;
    }
    Ok(())
}

fn send_all(fd: BorrowedFd<'_>, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len:  buf.len(),
        };
        // SAFETY: an all-zero msghdr is a valid empty message description.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1 as _;

        // SAFETY: `msg` points at `iov`, which describes `buf`; sendmsg only
        // reads through it. No control data is attached.
        let n = unsafe { libc::sendmsg(fd.as_raw_fd(), &msg, SEND_FLAGS) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}
